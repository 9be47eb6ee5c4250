//! Role definitions: the access matrix and mount/subscription grants a
//! login maps a peer to.

use shv_value::AccessLevel;

use crate::ri::RiPattern;

/// One access level's worth of granted RI patterns.
#[derive(Debug, Clone, Default)]
pub struct AccessGrant {
    pub level: AccessLevel,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Role {
    pub name: String,
    pub access: Vec<AccessGrant>,
    pub mount_points: Vec<String>,
    pub initial_subscriptions: Vec<String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn grant(mut self, level: AccessLevel, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.access.push(AccessGrant { level, patterns: patterns.into_iter().map(Into::into).collect() });
        self
    }

    pub fn allow_mount(mut self, pattern: impl Into<String>) -> Self {
        self.mount_points.push(pattern.into());
        self
    }

    pub fn subscribe_initially(mut self, ri: impl Into<String>) -> Self {
        self.initial_subscriptions.push(ri.into());
        self
    }

    /// The highest access level any of this role's grants allow for
    /// `(path, method)`, or [`AccessLevel::None`] if nothing matches.
    pub fn access_for(&self, path: &str, method: &str) -> AccessLevel {
        self.access
            .iter()
            .filter(|grant| grant.patterns.iter().any(|p| RiPattern::parse(p).matches_method(path, method)))
            .map(|grant| grant.level)
            .max()
            .unwrap_or(AccessLevel::None)
    }

    /// Whether `path` is allowed as a mount point for this role. A role
    /// with no `mount_points` entries may not mount at all.
    pub fn allows_mount(&self, path: &str) -> bool {
        self.mount_points.iter().any(|pattern| RiPattern::parse(pattern).matches_method(path, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_for_picks_highest_matching_grant() {
        let role = Role::new("admin").grant(AccessLevel::Read, ["**:*"]).grant(AccessLevel::Write, ["test/**:*"]);
        assert_eq!(role.access_for("other/path", "get"), AccessLevel::Read);
        assert_eq!(role.access_for("test/device", "set"), AccessLevel::Write);
    }

    #[test]
    fn no_matching_grant_yields_none() {
        let role = Role::new("guest");
        assert_eq!(role.access_for("any/path", "get"), AccessLevel::None);
    }

    #[test]
    fn mount_allowance_respects_pattern() {
        let role = Role::new("device").allow_mount("test/*");
        assert!(role.allows_mount("test/device1"));
        assert!(!role.allows_mount("other/device1"));
    }
}
