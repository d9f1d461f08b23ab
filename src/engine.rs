use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use url::Url;

use crate::rules::{ResourceType, RuleSet};

// block/allow decision over the shared rule pool

/// Schemes used by the host for its own UI and inlined resources.
const EXEMPT_SCHEMES: [&str; 6] = [
    "chrome-extension",
    "chrome",
    "devtools",
    "file",
    "data",
    "blob",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    Allow,
    Block,
}

impl MatchDecision {
    pub fn is_block(self) -> bool {
        self == MatchDecision::Block
    }
}

#[derive(Debug)]
pub struct MatchEngine {
    rules: RwLock<Arc<RuleSet>>,
    enabled: AtomicBool,
    scan_limit: usize,
}

impl MatchEngine {
    pub fn new(rules: RuleSet, scan_limit: usize) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            enabled: AtomicBool::new(true),
            scan_limit,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Current rule pool. Readers keep the snapshot they grabbed even if a
    /// refresh swaps in a new pool meanwhile.
    pub fn rules(&self) -> Arc<RuleSet> {
        match self.rules.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace_rules(&self, rules: RuleSet) {
        let rules = Arc::new(rules);
        match self.rules.write() {
            Ok(mut guard) => *guard = rules,
            Err(poisoned) => *poisoned.into_inner() = rules,
        }
    }

    pub fn should_block(&self, url: &str, resource_type: &ResourceType, referrer: &str) -> bool {
        self.decide(url, resource_type, referrer).is_block()
    }

    /// `$third-party` and `$~third-party` are kept on parsed rules but do not
    /// take part in the decision, so `_referrer` is currently unused.
    pub fn decide(
        &self,
        url: &str,
        resource_type: &ResourceType,
        _referrer: &str,
    ) -> MatchDecision {
        if !self.is_enabled() {
            return MatchDecision::Allow;
        }

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(_) => return MatchDecision::Allow,
        };

        if EXEMPT_SCHEMES.contains(&parsed.scheme()) {
            return MatchDecision::Allow;
        }

        let rules = self.rules();

        if rules.is_whitelisted(url) {
            return MatchDecision::Allow;
        }

        let host = parsed.host_str().unwrap_or_default();
        if !host.is_empty() && rules.is_domain_blocked(host) {
            return MatchDecision::Block;
        }

        match rules.matching_pattern(url, resource_type, self.scan_limit) {
            Some(_) => MatchDecision::Block,
            None => MatchDecision::Allow,
        }
    }

    pub fn is_domain_blocked(&self, hostname: &str) -> bool {
        self.rules().is_domain_blocked(hostname)
    }
}

/// `None` when either side has no usable host.
pub(crate) fn third_party(host: &str, referrer: &str) -> Option<bool> {
    let referrer_host = referrer_host(referrer)?;
    if host.is_empty() {
        return None;
    }
    Some(!host.eq_ignore_ascii_case(&referrer_host))
}

fn referrer_host(referrer: &str) -> Option<String> {
    if referrer.trim().is_empty() {
        return None;
    }
    let parsed = Url::parse(referrer).ok()?;
    parsed.host_str().map(|host| host.to_ascii_lowercase())
}
