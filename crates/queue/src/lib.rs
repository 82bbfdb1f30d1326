//! nsward work queue: coalesces reconcile requests per namespace, keeps at
//! most one in flight per name, and schedules retries with exponential backoff.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Exponential retry delay: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(5), max: Duration::from_secs(1000) }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

/// Queue bookkeeping with FIFO order. Entries are keyed by namespace name, so
/// the queue never holds more names than the cluster has namespaces.
///
/// A name is in at most one of `queued` or `in_flight`. A name pushed while in
/// flight is remembered in `dirty` and queued again by [`QueueState::finish`].
/// A scheduled retry only fires while the name still has a recorded failure.
#[derive(Debug, Default)]
pub struct QueueState {
    order: VecDeque<String>,
    queued: FxHashSet<String>,
    in_flight: FxHashSet<String>,
    dirty: FxHashSet<String>,
    failures: FxHashMap<String, u32>,
    gone: FxHashSet<String>,
    shutdown: bool,
}

impl QueueState {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }
    pub fn is_in_flight(&self, name: &str) -> bool { self.in_flight.contains(name) }
    pub fn failures(&self, name: &str) -> u32 { self.failures.get(name).copied().unwrap_or(0) }

    /// Returns true when `name` became ready for a worker.
    pub fn push(&mut self, name: &str) -> bool {
        if self.shutdown {
            return false;
        }
        if self.in_flight.contains(name) {
            self.dirty.insert(name.to_string());
            return false;
        }
        if self.queued.contains(name) {
            return false;
        }
        self.order.push_back(name.to_string());
        self.queued.insert(name.to_string());
        true
    }

    /// Move the oldest queued name to in-flight.
    pub fn take(&mut self) -> Option<String> {
        let name = self.order.pop_front()?;
        self.queued.remove(&name);
        self.in_flight.insert(name.clone());
        Some(name)
    }

    /// Mark `name` finished. Returns true when it was re-queued because it
    /// changed while in flight.
    pub fn finish(&mut self, name: &str) -> bool {
        self.in_flight.remove(name);
        if self.gone.remove(name) {
            // deleted mid-run: drop whatever failure that run recorded
            self.failures.remove(name);
        }
        if self.dirty.remove(name) { self.push(name) } else { false }
    }

    /// Record a failure and return the attempt index used for backoff.
    pub fn record_failure(&mut self, name: &str) -> u32 {
        let n = self.failures.entry(name.to_string()).or_insert(0);
        let attempt = *n;
        *n = n.saturating_add(1);
        attempt
    }

    pub fn forget(&mut self, name: &str) { self.failures.remove(name); }

    /// Push a backoff retry. Skipped once the failure was forgotten, either by a
    /// later success or by [`QueueState::remove`].
    pub fn push_retry(&mut self, name: &str) -> bool {
        if self.failures.contains_key(name) { self.push(name) } else { false }
    }

    /// Drop all state for a namespace that no longer exists. A run already in
    /// flight still finishes, but is not re-queued.
    pub fn remove(&mut self, name: &str) -> bool {
        let was_queued = self.queued.remove(name);
        if was_queued {
            self.order.retain(|n| n != name);
        }
        if self.in_flight.contains(name) {
            self.gone.insert(name.to_string());
        }
        self.dirty.remove(name);
        self.failures.remove(name);
        was_queued
    }
}

/// Shared async work queue.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: Backoff,
}

impl WorkQueue {
    pub fn new(backoff: Backoff) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(QueueState::new()), notify: Notify::new(), backoff })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize { self.state().len() }
    pub fn is_empty(&self) -> bool { self.state().is_empty() }
    pub fn failures(&self, name: &str) -> u32 { self.state().failures(name) }
    pub fn backoff(&self) -> Backoff { self.backoff }

    pub fn add(&self, name: &str) {
        let (ready, depth) = {
            let mut st = self.state();
            (st.push(name), st.len())
        };
        self.queued(name, ready, depth);
    }

    fn queued(&self, name: &str, ready: bool, depth: usize) {
        metrics::gauge!("nsward_queue_depth", depth as f64);
        if ready {
            debug!(namespace = %name, depth, "queued");
            self.notify.notify_one();
        }
    }

    fn add_retry(&self, name: &str) {
        let (ready, depth) = {
            let mut st = self.state();
            (st.push_retry(name), st.len())
        };
        if !ready {
            debug!(namespace = %name, "retry dropped; failure already cleared");
        }
        self.queued(name, ready, depth);
    }

    /// Forget a deleted namespace: pending entry, retries and failure count.
    pub fn remove(&self, name: &str) {
        let (was_queued, depth) = {
            let mut st = self.state();
            (st.remove(name), st.len())
        };
        metrics::gauge!("nsward_queue_depth", depth as f64);
        debug!(namespace = %name, was_queued, "removed from work queue");
    }

    /// Wait for the next name. Returns `None` once the queue is shut down.
    pub async fn pop(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.state();
                if st.shutdown {
                    return None;
                }
                if let Some(name) = st.take() {
                    let depth = st.len();
                    drop(st);
                    metrics::gauge!("nsward_queue_depth", depth as f64);
                    return Some(name);
                }
            }
            notified.await;
        }
    }

    pub fn done(&self, name: &str) {
        if self.state().finish(name) {
            debug!(namespace = %name, "changed while in flight; re-queued");
            self.notify.notify_one();
        }
    }

    /// Reset the failure count after a successful run.
    pub fn forget(&self, name: &str) { self.state().forget(name); }

    /// Schedule `name` again after its backoff delay; returns the delay.
    pub fn requeue_backoff(self: &Arc<Self>, name: &str) -> Duration {
        let attempt = self.state().record_failure(name);
        let delay = self.backoff.delay(attempt);
        metrics::counter!("nsward_queue_retries_total", 1);
        let queue = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add_retry(&name);
        });
        delay
    }

    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.notify.notify_waiters();
        info!("work queue shut down");
    }
}
