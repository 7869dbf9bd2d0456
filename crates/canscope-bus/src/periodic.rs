//! Periodic transmit tasks

use canscope_core::config::MIN_PERIOD;
use canscope_core::{IdKey, PeriodicItem};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transmit::Transmitter;

struct PeriodicTask {
    key: IdKey,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Set of repeating transmit tasks bound to one session
///
/// Every task sends through the session's [`Transmitter`], so periodic
/// ticks and single-shot transmits never overlap at the driver. Task
/// tokens are children of the session token; cancelling the session
/// stops every task.
pub struct PeriodicScheduler {
    transmitter: Transmitter,
    session_token: CancellationToken,
    tasks: Vec<PeriodicTask>,
}

impl PeriodicScheduler {
    pub(crate) fn new(transmitter: Transmitter, session_token: CancellationToken) -> Self {
        Self {
            transmitter,
            session_token,
            tasks: Vec::new(),
        }
    }

    /// Replace the running tasks with one task per enabled item.
    ///
    /// Each task fires immediately, then once per period until stopped.
    /// Returns the number of tasks started. Nothing is reported to
    /// observers here.
    pub fn start_all(&mut self, items: &[PeriodicItem]) -> usize {
        self.stop_all();

        for item in items.iter().filter(|item| item.enabled) {
            let token = self.session_token.child_token();
            let handle = spawn_task(item.clone(), self.transmitter.clone(), token.clone());
            self.tasks.push(PeriodicTask {
                key: item.frame.key(),
                token,
                handle,
            });
        }

        let count = self.tasks.len();
        debug!(count, "Periodic tasks started");
        count
    }

    /// Stop and release every running task. Safe to call with none running.
    ///
    /// Returns true if any task was stopped.
    pub fn stop_all(&mut self) -> bool {
        if self.tasks.is_empty() {
            return false;
        }
        for task in self.tasks.drain(..) {
            task.token.cancel();
            task.handle.abort();
            debug!(id = %task.key, "Periodic task stopped");
        }
        true
    }

    /// Number of tasks currently held by the scheduler
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Identifier keys of the running tasks, in start order
    pub fn active_keys(&self) -> Vec<IdKey> {
        self.tasks.iter().map(|task| task.key.clone()).collect()
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.token.cancel();
            task.handle.abort();
        }
    }
}

fn spawn_task(
    item: PeriodicItem,
    transmitter: Transmitter,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(item.period.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if transmitter.send(&item.frame) == 0 {
                        debug!(id = %item.frame.key(), "Periodic frame not accepted");
                    }
                }
            }
        }
    })
}
