//! Host allow-list and asset classification.
//!
//! Both rules are fixed string tests on the hostname. Results are memoized per
//! host string for the life of the process; the memo never replaces the rules.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Memoized host classification shared by every connection.
#[derive(Debug, Default)]
pub struct AccessControl {
    allowed: DashMap<String, bool>,
    asset: DashMap<String, bool>,
    evaluations: AtomicU64,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the proxy serves `host` at all (tunnel or intercept).
    pub fn is_allowed(&self, host: &str) -> bool {
        self.classify(&self.allowed, host, allowed_rule)
    }

    /// Whether `host` serves static assets worth caching.
    pub fn is_asset(&self, host: &str) -> bool {
        self.classify(&self.asset, host, asset_rule)
    }

    /// Number of times a rule was actually evaluated rather than read from the memo.
    pub fn rule_evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    fn classify(&self, memo: &DashMap<String, bool>, host: &str, rule: fn(&str) -> bool) -> bool {
        if let Some(hit) = memo.get(host) {
            return *hit;
        }
        let result = *memo.entry(host.to_string()).or_insert_with(|| {
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            rule(host)
        });
        result
    }
}

fn allowed_rule(host: &str) -> bool {
    (host.starts_with("game") && host.ends_with(".granbluefantasy.jp"))
        || (host.starts_with("gbf.game") && host.ends_with(".mbga.jp"))
        || host.ends_with(".mobage.jp")
}

fn asset_rule(host: &str) -> bool {
    host.starts_with("game-a") || host.starts_with("gbf.game-a")
}
