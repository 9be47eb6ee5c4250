use std::fmt;
use std::str::FromStr;

/// Access level granted to an RPC caller, totally ordered from least to most
/// privileged.
///
/// The discriminants match the reference `rpcmsg_access` enum so a level can
/// be packed directly as a ChainPack int without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AccessLevel {
    None = 0,
    Browse = 1,
    Read = 2,
    Write = 3,
    Command = 4,
    Config = 5,
    Service = 6,
    SuperService = 7,
    Devel = 8,
    Admin = 9,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 10] = [
        AccessLevel::None,
        AccessLevel::Browse,
        AccessLevel::Read,
        AccessLevel::Write,
        AccessLevel::Command,
        AccessLevel::Config,
        AccessLevel::Service,
        AccessLevel::SuperService,
        AccessLevel::Devel,
        AccessLevel::Admin,
    ];

    /// Legacy comma-separated token, e.g. `"wr"`, `"ssrv"`.
    pub fn legacy_token(self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Browse => "bws",
            AccessLevel::Read => "rd",
            AccessLevel::Write => "wr",
            AccessLevel::Command => "cmd",
            AccessLevel::Config => "cfg",
            AccessLevel::Service => "srv",
            AccessLevel::SuperService => "ssrv",
            AccessLevel::Devel => "dev",
            AccessLevel::Admin => "su",
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|lvl| *lvl as u8 == v)
    }

    /// Parse the legacy grant string: comma-separated tokens, of which only
    /// the highest-ranked token recognized matters (trailing tokens such as
    /// per-path overrides are ignored here, same as the reference client).
    pub fn parse_legacy(s: &str) -> Option<Self> {
        s.split(',')
            .filter_map(|tok| Self::from_legacy_token(tok.trim()))
            .max()
    }

    fn from_legacy_token(tok: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lvl| lvl.legacy_token() == tok)
    }
}

impl FromStr for AccessLevel {
    type Err = ParseAccessLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_legacy(s).ok_or_else(|| ParseAccessLevelError(s.to_owned()))
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.legacy_token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAccessLevelError(String);

impl fmt::Display for ParseAccessLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized access grant: {:?}", self.0)
    }
}

impl std::error::Error for ParseAccessLevelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_matches_spec() {
        assert!(AccessLevel::None < AccessLevel::Browse);
        assert!(AccessLevel::Browse < AccessLevel::Read);
        assert!(AccessLevel::Read < AccessLevel::Write);
        assert!(AccessLevel::Write < AccessLevel::Command);
        assert!(AccessLevel::Command < AccessLevel::Config);
        assert!(AccessLevel::Config < AccessLevel::Service);
        assert!(AccessLevel::Service < AccessLevel::SuperService);
        assert!(AccessLevel::SuperService < AccessLevel::Devel);
        assert!(AccessLevel::Devel < AccessLevel::Admin);
    }

    #[test]
    fn parses_single_token() {
        assert_eq!("wr".parse::<AccessLevel>().unwrap(), AccessLevel::Write);
        assert_eq!("su".parse::<AccessLevel>().unwrap(), AccessLevel::Admin);
    }

    #[test]
    fn picks_highest_of_comma_list() {
        assert_eq!(AccessLevel::parse_legacy("rd,wr,bws"), Some(AccessLevel::Write));
    }

    #[test]
    fn rejects_unknown_token() {
        assert!("bogus".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn display_roundtrips_token() {
        for lvl in AccessLevel::ALL {
            assert_eq!(lvl.to_string().parse::<AccessLevel>().unwrap(), lvl);
        }
    }

    #[test]
    fn from_u8_matches_discriminant() {
        assert_eq!(AccessLevel::from_u8(4), Some(AccessLevel::Command));
        assert_eq!(AccessLevel::from_u8(200), None);
    }
}
