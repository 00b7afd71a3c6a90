//! Cooldown timer bookkeeping.
//!
//! One entry per tripped circuit, keyed by circuit id, each holding the
//! handle of the one-shot tokio task that will attempt the automatic
//! reset. The table makes the two rules of the scheduler explicit
//! operations: arming always cancels any previous timer for the same
//! circuit, and teardown cancels everything.
//!
//! The lock around the table is a plain mutex and is never held across an
//! await point.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::debug;

/// Table of live cooldown timers, one at most per circuit.
#[derive(Default)]
pub struct TimerRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimerRegistry {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned timer task for a circuit.
    ///
    /// Any previous timer for the same circuit is aborted first, so a
    /// circuit can never have two live timers.
    pub fn arm(&self, circuit_id: &str, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.insert(circuit_id.to_string(), handle) {
            previous.abort();
            debug!(circuit = %circuit_id, "previous cooldown timer cancelled before rescheduling");
        }
    }

    /// Cancel a circuit's pending timer, if any.
    pub fn disarm(&self, circuit_id: &str) -> bool {
        match self.tasks.lock().remove(circuit_id) {
            Some(handle) => {
                handle.abort();
                debug!(circuit = %circuit_id, "cooldown timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Claim a circuit's entry without aborting the task.
    ///
    /// The firing timer task calls this on itself so the table never holds
    /// handles of completed tasks.
    pub fn take(&self, circuit_id: &str) -> Option<JoinHandle<()>> {
        self.tasks.lock().remove(circuit_id)
    }

    /// Whether a circuit has a pending timer.
    pub fn is_armed(&self, circuit_id: &str) -> bool {
        self.tasks.lock().contains_key(circuit_id)
    }

    /// Number of pending timers.
    pub fn armed(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel every pending timer, returning the handles for draining.
    pub fn shutdown(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = self.tasks.lock();
        let handles: Vec<JoinHandle<()>> = tasks.drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            handle.abort();
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_replaces_previous_timer() {
        let timers = TimerRegistry::new();
        let first = sleeper();
        let first_abort = first.abort_handle();

        timers.arm("c1", first);
        timers.arm("c1", sleeper());

        assert_eq!(timers.armed(), 1);
        tokio::task::yield_now().await;
        assert!(first_abort.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_cancels_and_removes() {
        let timers = TimerRegistry::new();
        timers.arm("c1", sleeper());

        assert!(timers.is_armed("c1"));
        assert!(timers.disarm("c1"));
        assert!(!timers.is_armed("c1"));
        assert!(!timers.disarm("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let timers = TimerRegistry::new();
        timers.arm("c1", sleeper());
        timers.arm("c2", sleeper());
        timers.arm("c3", sleeper());

        let handles = timers.shutdown();
        assert_eq!(handles.len(), 3);
        assert_eq!(timers.armed(), 0);

        for handle in handles {
            // Draining aborted tasks never hangs.
            let _ = handle.await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_leaves_task_running() {
        let timers = TimerRegistry::new();
        timers.arm("c1", sleeper());

        let handle = timers.take("c1").unwrap();
        assert!(!timers.is_armed("c1"));
        assert!(!handle.is_finished());
        handle.abort();
    }
}
