//! Long-poll watcher registry.
//!
//! Each waiter is an explicit `(base revision, pattern, promise)` record;
//! notification is a straight loop over matches producing completions.
//! Completion channels are never fired while the registry lock is held, so
//! a completed watcher may immediately re-enter the repository without
//! deadlocking.

use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::{model::Revision, pattern::PathPattern};

/// What a waiter's promise resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchSignal {
    /// A commit touching a matching path landed at this revision.
    Matched(Revision),
    /// The repository is closing; the watch fails with `ShuttingDown`.
    Shutdown,
}

struct Waiter {
    base: Revision,
    pattern: PathPattern,
    tx: oneshot::Sender<WatchSignal>,
}

/// Registry of pending watchers for one repository.
#[derive(Default)]
pub(crate) struct WatcherRegistry {
    waiters: Mutex<Vec<Waiter>>,
}

impl WatcherRegistry {
    pub fn new() -> WatcherRegistry {
        WatcherRegistry::default()
    }

    /// Register a waiter. The caller must have already run the
    /// `find_latest_revision` double-check under the read lock, so no
    /// update between the last read and this registration can be missed.
    pub fn register(&self, base: Revision, pattern: PathPattern) -> oneshot::Receiver<WatchSignal> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().unwrap();
        waiters.push(Waiter { base, pattern, tx });
        rx
    }

    /// Complete every waiter whose pattern matches any of the changed
    /// paths. Cancelled waiters (dropped receivers) are pruned in the same
    /// pass. Completions fire after the lock is released.
    pub fn notify(&self, revision: Revision, changed_paths: &[String]) {
        let mut matched = Vec::new();
        {
            let mut waiters = self.waiters.lock().unwrap();
            let mut kept = Vec::with_capacity(waiters.len());
            for waiter in waiters.drain(..) {
                if waiter.tx.is_closed() {
                    continue;
                }
                let hit = waiter.base < revision
                    && changed_paths.iter().any(|p| waiter.pattern.matches(p));
                if hit {
                    matched.push(waiter);
                } else {
                    kept.push(waiter);
                }
            }
            *waiters = kept;
        }
        if !matched.is_empty() {
            debug!(
                revision = revision.as_i64(),
                count = matched.len(),
                "notifying watchers"
            );
        }
        for waiter in matched {
            let _ = waiter.tx.send(WatchSignal::Matched(revision));
        }
    }

    /// Number of pending waiters (pruning nothing).
    pub fn len(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }

    /// Terminal shutdown: complete everything with the shutdown signal.
    pub fn shutdown(&self) {
        let drained: Vec<Waiter> = {
            let mut waiters = self.waiters.lock().unwrap();
            std::mem::take(&mut *waiters)
        };
        debug!(count = drained.len(), "failing pending watchers for shutdown");
        for waiter in drained {
            let _ = waiter.tx.send(WatchSignal::Shutdown);
        }
    }
}
