//! The subscription table: which clients want which signals, plus the
//! per-client TTL expiry schedule the idle callback drains.

use crate::cidset::CidSet;
use crate::ri::RiPattern;

struct Entry {
    pattern: RiPattern,
    cids: CidSet,
}

#[derive(Default)]
pub struct SubscriptionTable {
    entries: Vec<Entry>,
    /// `(expires_at_ms, cid, ri)`, kept sorted by expiry so idle expiry is
    /// a prefix scan rather than a full walk.
    ttls: Vec<(u64, i64, String)>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, cid: i64, ri: &str) {
        let pattern = RiPattern::parse(ri);
        match self.entries.iter_mut().find(|e| e.pattern == pattern) {
            Some(e) => e.cids.set(cid),
            None => {
                let mut cids = CidSet::new();
                cids.set(cid);
                self.entries.push(Entry { pattern, cids });
            }
        }
    }

    pub fn subscribe_with_ttl(&mut self, cid: i64, ri: &str, now_ms: u64, ttl_s: u64) {
        self.subscribe(cid, ri);
        let idx = self.ttls.partition_point(|(t, ..)| *t < now_ms + ttl_s * 1000);
        self.ttls.insert(idx, (now_ms + ttl_s * 1000, cid, ri.to_string()));
    }

    pub fn unsubscribe(&mut self, cid: i64, ri: &str) {
        let pattern = RiPattern::parse(ri);
        if let Some(e) = self.entries.iter_mut().find(|e| e.pattern == pattern) {
            e.cids.clear(cid);
        }
        self.ttls.retain(|(_, c, r)| !(*c == cid && r == ri));
    }

    pub fn unsubscribe_all(&mut self, cid: i64) {
        for e in &mut self.entries {
            e.cids.clear(cid);
        }
        self.ttls.retain(|(_, c, _)| *c != cid);
    }

    /// Lists every active subscription for `cid`, as RI strings.
    pub fn subscriptions_of(&self, cid: i64) -> Vec<String> {
        self.entries.iter().filter(|e| e.cids.contains(cid)).map(|e| e.pattern.as_str()).collect()
    }

    /// Returns the set of cids subscribed to a matching pattern for this
    /// signal.
    pub fn matching_cids(&self, path: &str, source: &str, signal: &str) -> CidSet {
        let mut out = CidSet::new();
        for e in &self.entries {
            if e.pattern.matches_signal(path, source, signal) {
                e.cids.or_into(&mut out);
            }
        }
        out
    }

    /// Expires every TTL subscription due at or before `now_ms`, returning
    /// the milliseconds until the next expiry, or `None` if none remain.
    pub fn expire(&mut self, now_ms: u64) -> Option<u64> {
        while let Some((expires_at, cid, ri)) = self.ttls.first().cloned() {
            if expires_at > now_ms {
                return Some(expires_at - now_ms);
            }
            self.unsubscribe(cid, &ri);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_match_then_unsubscribe() {
        let mut t = SubscriptionTable::new();
        t.subscribe(7, "**:*:*");
        let cids = t.matching_cids("a/b", "get", "chng");
        assert!(cids.contains(7));
        t.unsubscribe(7, "**:*:*");
        let cids = t.matching_cids("a/b", "get", "chng");
        assert!(!cids.contains(7));
    }

    #[test]
    fn disconnecting_client_drops_all_subscriptions() {
        let mut t = SubscriptionTable::new();
        t.subscribe(1, "a:*:*");
        t.subscribe(1, "b:*:*");
        t.unsubscribe_all(1);
        assert!(t.subscriptions_of(1).is_empty());
    }

    #[test]
    fn ttl_expiry_removes_subscription_and_reports_next_deadline() {
        let mut t = SubscriptionTable::new();
        t.subscribe_with_ttl(1, "a:*:*", 0, 5);
        t.subscribe_with_ttl(2, "b:*:*", 0, 10);
        assert_eq!(t.expire(2_000), Some(3_000));
        assert!(!t.matching_cids("a", "get", "chng").contains(1));
        assert_eq!(t.expire(11_000), None);
        assert!(!t.matching_cids("b", "get", "chng").contains(2));
    }

    #[test]
    fn multiple_clients_same_pattern_both_match() {
        let mut t = SubscriptionTable::new();
        t.subscribe(1, "x:*:*");
        t.subscribe(2, "x:*:*");
        let cids = t.matching_cids("x", "get", "chng");
        assert!(cids.contains(1));
        assert!(cids.contains(2));
    }
}
