use std::sync::{Arc, Mutex, Weak};

use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    config::Config,
    engine::MatchEngine,
    filter_list::{self, ListContent},
    interceptor::Interceptor,
    parser::{self, ParseSummary},
    rules::{ResourceType, RuleSet},
    stats::{BlockStats, Notifier, Observer, ObserverId, StateSnapshot},
};

/// The blocker instance a host constructs once and shares by handle with its
/// interception callbacks and UI queries.
#[derive(Debug)]
pub struct AdBlocker {
    config: Config,
    engine: MatchEngine,
    stats: BlockStats,
    notifier: Notifier,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

/// Outcome of one acquisition and parse cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub lists: Vec<String>,
    pub parse: ParseSummary,
    pub domain_rules: usize,
    pub pattern_rules: usize,
    pub whitelist_rules: usize,
}

impl AdBlocker {
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_rules(config, RuleSet::new())
    }

    pub fn with_rules(config: Config, rules: RuleSet) -> Arc<Self> {
        let engine = MatchEngine::new(rules, config.pattern_scan_limit);
        engine.set_enabled(config.enabled);
        let notifier = Notifier::new(config.notify_throttle());

        Arc::new(Self {
            config,
            engine,
            stats: BlockStats::new(),
            notifier,
            refresh_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn interceptor(self: &Arc<Self>) -> Interceptor {
        Interceptor::new(self.clone())
    }

    /// Runs one acquisition cycle and swaps in the rules parsed from it.
    pub async fn refresh(&self) -> RefreshSummary {
        tracing::info!(lists = self.config.lists.len(), "refreshing filter lists");
        let contents = filter_list::acquire(&self.config).await;
        self.install_lists(&contents)
    }

    /// Parses `contents` and replaces the current rule pool with the result.
    pub fn install_lists(&self, contents: &[ListContent]) -> RefreshSummary {
        let mut rules = RuleSet::new();
        let mut summary = RefreshSummary::default();

        for content in contents {
            let (parsed, counts) = parser::parse_list(&content.text);
            tracing::debug!(list = %content.name, origin = ?content.origin, domains = counts.domains, patterns = counts.patterns, "filter list ready");
            rules.merge(parsed);
            summary.lists.push(content.name.clone());
            summary.parse = add_counts(summary.parse, counts);
        }

        summary.domain_rules = rules.domain_count();
        summary.pattern_rules = rules.pattern_count();
        summary.whitelist_rules = rules.whitelist_count();
        self.engine.replace_rules(rules);

        tracing::info!(
            lists = summary.lists.len(),
            domains = summary.domain_rules,
            patterns = summary.pattern_rules,
            whitelist = summary.whitelist_rules,
            "filter rules installed"
        );

        summary
    }

    /// Replaces the rule pool with the rules of a single in-memory list.
    pub fn install_text(&self, text: &str) -> RefreshSummary {
        let content = ListContent {
            name: "inline".to_string(),
            text: text.to_string(),
            origin: filter_list::ListOrigin::Cache,
        };
        self.install_lists(std::slice::from_ref(&content))
    }

    /// Loads the lists immediately and then again every refresh interval.
    /// Must be called from within a Tokio runtime. Calling it again restarts
    /// the loop.
    pub fn start(self: &Arc<Self>) {
        let blocker: Weak<Self> = Arc::downgrade(self);
        let period = self.config.refresh_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(blocker) = blocker.upgrade() else {
                    break;
                };
                blocker.refresh().await;
            }
        });

        let mut slot = match self.refresh_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        let task = match self.refresh_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        self.notifier.cancel_pending();
    }

    pub fn should_block(&self, url: &str, resource_type: &ResourceType, referrer: &str) -> bool {
        self.engine.should_block(url, resource_type, referrer)
    }

    pub fn is_domain_blocked(&self, hostname: &str) -> bool {
        self.engine.is_domain_blocked(hostname)
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_enabled()
    }

    pub fn blocked_count(&self) -> u64 {
        self.stats.blocked()
    }

    pub fn tab_blocked(&self, tab_id: u64) -> u64 {
        self.stats.tab_blocked(tab_id)
    }

    /// Drops the per-tab counter once the host closes the tab.
    pub fn forget_tab(&self, tab_id: u64) {
        self.stats.forget_tab(tab_id);
    }

    pub fn state(&self) -> StateSnapshot {
        let rules = self.engine.rules();
        StateSnapshot {
            enabled: self.engine.is_enabled(),
            blocked_count: self.stats.blocked(),
            domain_rules: rules.domain_count(),
            pattern_rules: rules.pattern_count(),
            whitelist_rules: rules.whitelist_count(),
        }
    }

    /// Sets the enabled flag, or flips it when `enabled` is `None`. The
    /// counter is left untouched.
    pub fn toggle(&self, enabled: Option<bool>) -> StateSnapshot {
        let next = enabled.unwrap_or(!self.engine.is_enabled());
        self.engine.set_enabled(next);
        tracing::info!(enabled = next, "ad blocker {}", if next { "enabled" } else { "disabled" });
        self.state()
    }

    /// Zeroes the counters and pushes one update to every observer at once.
    pub fn reset_count(&self) -> StateSnapshot {
        self.stats.reset();
        let snapshot = self.state();
        self.notifier.fire_now(&snapshot);
        snapshot
    }

    pub fn subscribe<O>(&self, observer: &Arc<O>) -> ObserverId
    where
        O: Observer + 'static,
    {
        let weak: Weak<dyn Observer> = Arc::downgrade(observer) as Weak<dyn Observer>;
        self.notifier.subscribe(weak)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Counts one blocked request and schedules a throttled push.
    pub(crate) fn record_block(self: &Arc<Self>, tab_id: Option<u64>) {
        self.stats.record_block(tab_id);

        let blocker = Arc::downgrade(self);
        self.notifier.schedule(move || {
            if let Some(blocker) = blocker.upgrade() {
                blocker.notifier.fire_pending(|| blocker.state());
            }
        });
    }
}

impl Drop for AdBlocker {
    fn drop(&mut self) {
        let task = match self.refresh_task.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

fn add_counts(total: ParseSummary, other: ParseSummary) -> ParseSummary {
    ParseSummary {
        lines: total.lines + other.lines,
        domains: total.domains + other.domains,
        patterns: total.patterns + other.patterns,
        whitelist: total.whitelist + other.whitelist,
        skipped: total.skipped + other.skipped,
    }
}
