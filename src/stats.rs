use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};

// blocked-request counters and throttled observer fan-out

/// State pushed to observers and returned by UI queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub enabled: bool,
    pub blocked_count: u64,
    pub domain_rules: usize,
    pub pattern_rules: usize,
    pub whitelist_rules: usize,
}

#[derive(Debug, Default)]
pub struct BlockStats {
    blocked_total: AtomicU64,
    blocked_per_tab: Mutex<HashMap<u64, u64>>,
}

impl BlockStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocked(&self) -> u64 {
        self.blocked_total.load(Ordering::Relaxed)
    }

    /// Returns the counter value after the increment.
    pub fn record_block(&self, tab_id: Option<u64>) -> u64 {
        if let Some(tab_id) = tab_id {
            *lock(&self.blocked_per_tab).entry(tab_id).or_insert(0) += 1;
        }
        self.blocked_total.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn tab_blocked(&self, tab_id: u64) -> u64 {
        lock(&self.blocked_per_tab)
            .get(&tab_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn forget_tab(&self, tab_id: u64) {
        lock(&self.blocked_per_tab).remove(&tab_id);
    }

    pub fn reset(&self) {
        self.blocked_total.store(0, Ordering::Relaxed);
        lock(&self.blocked_per_tab).clear();
    }
}

/// Receiver of throttled state updates. The notifier only keeps a weak
/// reference, so the owner of the observer controls its lifetime.
pub trait Observer: Send + Sync {
    fn notify(&self, snapshot: &StateSnapshot);

    /// A closed observer is dropped from the registry on the next push.
    fn is_closed(&self) -> bool {
        false
    }
}

impl Observer for mpsc::UnboundedSender<StateSnapshot> {
    fn notify(&self, snapshot: &StateSnapshot) {
        let _ = self.send(snapshot.clone());
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A push waiting for its throttle window to elapse.
enum PendingPush {
    Task(JoinHandle<()>),
    /// Used when no Tokio runtime is reachable from the caller.
    Timer {
        cancelled: Arc<AtomicBool>,
        handle: thread::JoinHandle<()>,
    },
}

impl PendingPush {
    fn is_finished(&self) -> bool {
        match self {
            PendingPush::Task(handle) => handle.is_finished(),
            PendingPush::Timer { handle, .. } => handle.is_finished(),
        }
    }

    fn cancel(self) {
        match self {
            PendingPush::Task(handle) => handle.abort(),
            PendingPush::Timer { cancelled, .. } => cancelled.store(true, Ordering::SeqCst),
        }
    }
}

pub struct Notifier {
    throttle: Duration,
    runtime: Option<Handle>,
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Weak<dyn Observer>)>>,
    pending: Mutex<Option<PendingPush>>,
}

impl Notifier {
    /// Captures the ambient Tokio runtime, if any. Without one, scheduled
    /// pushes wait out the throttle window on a timer thread.
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            runtime: Handle::try_current().ok(),
            next_id: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, observer: Weak<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.observers).push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending)
            .as_ref()
            .is_some_and(|push| !push.is_finished())
    }

    /// Schedules `fire` after the throttle window unless a push is already
    /// pending. `fire` is expected to call [`Notifier::fire_pending`] and
    /// never runs on the caller's thread.
    pub fn schedule<F>(&self, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = lock(&self.pending);
        if pending.as_ref().is_some_and(|push| !push.is_finished()) {
            return;
        }

        let delay = self.throttle;
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());

        if let Some(runtime) = runtime {
            *pending = Some(PendingPush::Task(runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                fire();
            })));
            return;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let spawned = thread::Builder::new()
            .name("adshield-notify".to_string())
            .spawn(move || {
                thread::sleep(delay);
                if !flag.load(Ordering::SeqCst) {
                    fire();
                }
            });

        match spawned {
            Ok(handle) => *pending = Some(PendingPush::Timer { cancelled, handle }),
            Err(err) => {
                tracing::warn!(error = %err, "failed to start notification timer, update dropped");
            }
        }
    }

    /// Clears the pending slot before taking the snapshot so that changes
    /// made during delivery schedule a fresh push.
    pub fn fire_pending<F>(&self, snapshot: F)
    where
        F: FnOnce() -> StateSnapshot,
    {
        lock(&self.pending).take();
        self.broadcast(&snapshot());
    }

    /// Drops any pending push and delivers `snapshot` right away.
    pub fn fire_now(&self, snapshot: &StateSnapshot) {
        self.cancel_pending();
        self.broadcast(snapshot);
    }

    pub fn cancel_pending(&self) {
        if let Some(push) = lock(&self.pending).take() {
            push.cancel();
        }
    }

    fn broadcast(&self, snapshot: &StateSnapshot) {
        let live: Vec<_> = {
            let mut observers = lock(&self.observers);
            let mut live = Vec::with_capacity(observers.len());
            observers.retain(|(id, weak)| match weak.upgrade() {
                Some(observer) if !observer.is_closed() => {
                    live.push(observer);
                    true
                }
                _ => {
                    tracing::debug!(observer = id.0, "observer gone, deregistering");
                    false
                }
            });
            live
        };

        for observer in live {
            observer.notify(snapshot);
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("throttle", &self.throttle)
            .field("observers", &self.observer_count())
            .field("pending", &self.is_pending())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
