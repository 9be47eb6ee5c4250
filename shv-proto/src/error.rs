use std::fmt;

/// The well-known RPC error codes. Values from 10 through 31 are reserved;
/// application-defined codes start at [`ErrorCode::USER_CODE_START`].
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError = 0,
    InvalidRequest = 1,
    MethodNotFound = 2,
    InvalidParam = 3,
    InternalErr = 4,
    ParseErr = 5,
    MethodCallTimeout = 6,
    MethodCallCancelled = 7,
    MethodCallException = 8,
    Unknown = 9,
}

impl ErrorCode {
    pub const USER_CODE_START: i64 = 32;

    pub fn from_i64(v: i64) -> Option<Self> {
        Some(match v {
            0 => Self::NoError,
            1 => Self::InvalidRequest,
            2 => Self::MethodNotFound,
            3 => Self::InvalidParam,
            4 => Self::InternalErr,
            5 => Self::ParseErr,
            6 => Self::MethodCallTimeout,
            7 => Self::MethodCallCancelled,
            8 => Self::MethodCallException,
            9 => Self::Unknown,
            _ => return None,
        })
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NoError",
            Self::InvalidRequest => "InvalidRequest",
            Self::MethodNotFound => "MethodNotFound",
            Self::InvalidParam => "InvalidParam",
            Self::InternalErr => "InternalErr",
            Self::ParseErr => "ParseErr",
            Self::MethodCallTimeout => "MethodCallTimeout",
            Self::MethodCallCancelled => "MethodCallCancelled",
            Self::MethodCallException => "MethodCallException",
            Self::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// An error as it travels on the wire: a numeric code plus a message.
/// `code` is kept raw (not the [`ErrorCode`] enum) since user codes and
/// the 10..32 reserved gap don't have a named variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code.as_i64(), message: message.into() }
    }

    pub fn user(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn known(&self) -> Option<ErrorCode> {
        ErrorCode::from_i64(self.code)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("method not found: {method}"))
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParam, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => write!(f, "error {}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code_roundtrips() {
        assert_eq!(ErrorCode::from_i64(3), Some(ErrorCode::InvalidParam));
        assert_eq!(ErrorCode::InvalidParam.as_i64(), 3);
    }

    #[test]
    fn user_code_has_no_known_variant() {
        let err = RpcError::user(40, "custom failure");
        assert_eq!(err.known(), None);
        assert_eq!(err.to_string(), "error 40: custom failure");
    }

    #[test]
    fn display_uses_variant_name() {
        let err = RpcError::method_not_found("ping");
        assert_eq!(err.to_string(), "MethodNotFound: method not found: ping");
    }
}
