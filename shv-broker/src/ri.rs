//! The RPC-RI glob matcher: `path:source:signal` patterns (or `path:method`
//! for access rules), where each of `path`'s slash-separated components and
//! the trailing fields may be `*` (any one component) or `**` (any number
//! of components, only meaningful in the path part).

/// Matches a single glob field (`*` = any one segment, a literal = exact).
fn field_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

/// Matches a slash-separated path against a pattern that may contain `*`
/// (one component) and `**` (zero or more components) segments.
fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = if pattern.is_empty() { Vec::new() } else { pattern.split('/').collect() };
    let path: Vec<&str> = if path.is_empty() { Vec::new() } else { path.split('/').collect() };
    path_matches_segments(&pattern, &path)
}

fn path_matches_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=path.len()).any(|skip| path_matches_segments(&pattern[1..], &path[skip..]))
        }
        Some(seg) => match path.first() {
            Some(p) if field_matches(seg, p) => path_matches_segments(&pattern[1..], &path[1..]),
            _ => false,
        },
    }
}

/// An RPC-RI pattern: `path:source:signal` for subscriptions, or
/// `path:method` for access rules (`source` absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiPattern {
    path: String,
    source: Option<String>,
    tail: String,
}

impl RiPattern {
    /// Parses `path:source:signal` or `path:method`. A missing field
    /// defaults to `*`.
    pub fn parse(ri: &str) -> Self {
        let mut parts = ri.splitn(3, ':');
        let path = parts.next().unwrap_or("*").to_string();
        let rest: Vec<&str> = parts.collect();
        match rest.len() {
            2 => Self { path, source: Some(rest[0].to_string()), tail: rest[1].to_string() },
            1 => Self { path, source: None, tail: rest[0].to_string() },
            _ => Self { path, source: None, tail: "*".to_string() },
        }
    }

    /// Matches a `(path, source, signal)` triple (subscription form).
    pub fn matches_signal(&self, path: &str, source: &str, signal: &str) -> bool {
        path_matches(&self.path, path)
            && self.source.as_deref().is_none_or(|s| field_matches(s, source))
            && field_matches(&self.tail, signal)
    }

    /// Matches a `(path, method)` pair (access form).
    pub fn matches_method(&self, path: &str, method: &str) -> bool {
        path_matches(&self.path, path) && field_matches(&self.tail, method)
    }

    pub fn as_str(&self) -> String {
        match &self.source {
            Some(source) => format!("{}:{}:{}", self.path, source, self.tail),
            None => format!("{}:{}", self.path, self.tail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_matches_any_depth() {
        let ri = RiPattern::parse("**:*:*");
        assert!(ri.matches_signal("", "get", "chng"));
        assert!(ri.matches_signal("a/b/c", "get", "chng"));
    }

    #[test]
    fn single_star_matches_one_component_only() {
        let ri = RiPattern::parse("test/*:*:*");
        assert!(ri.matches_signal("test/device", "get", "chng"));
        assert!(!ri.matches_signal("test/device/status", "get", "chng"));
    }

    #[test]
    fn exact_path_requires_exact_match() {
        let ri = RiPattern::parse("test/device:get:chng");
        assert!(ri.matches_signal("test/device", "get", "chng"));
        assert!(!ri.matches_signal("test/other", "get", "chng"));
        assert!(!ri.matches_signal("test/device", "get", "other"));
    }

    #[test]
    fn method_form_defaults_source_as_wildcard() {
        let ri = RiPattern::parse("test/device:set");
        assert!(ri.matches_method("test/device", "set"));
        assert!(!ri.matches_method("test/device", "get"));
    }

    #[test]
    fn mid_path_double_star() {
        let ri = RiPattern::parse("a/**/z:*:*");
        assert!(ri.matches_signal("a/z", "get", "chng"));
        assert!(ri.matches_signal("a/b/c/z", "get", "chng"));
        assert!(!ri.matches_signal("a/b/c/y", "get", "chng"));
    }
}
