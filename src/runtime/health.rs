use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// How often idle long-running tasks report liveness.
pub const PULSE_INTERVAL: Duration = Duration::from_secs(1);

/// Readiness flag plus liveness pulses from every long-running task.
#[derive(Debug)]
pub struct HealthMonitor {
    ready_tx: watch::Sender<bool>,
    pulses: Mutex<HashMap<String, Instant>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            ready_tx,
            pulses: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_ready(&self) {
        if !*self.ready_tx.borrow() {
            tracing::info!("watcher ready");
        }
        self.ready_tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.ready_tx.send_replace(false);
        self.lock_pulses().clear();
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Receiver that observes readiness transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn pulse(&self, task: &str) {
        let now = Instant::now();
        let mut pulses = self.lock_pulses();
        match pulses.get_mut(task) {
            Some(last) => *last = now,
            None => {
                pulses.insert(task.to_owned(), now);
            }
        }
    }

    pub fn last_pulse(&self, task: &str) -> Option<Instant> {
        self.lock_pulses().get(task).copied()
    }

    pub fn task_count(&self) -> usize {
        self.lock_pulses().len()
    }

    /// Tasks that have not pulsed within `max_silence`, sorted by name.
    pub fn stale_tasks(&self, max_silence: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut stale: Vec<String> = self
            .lock_pulses()
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > max_silence)
            .map(|(task, _)| task.clone())
            .collect();
        stale.sort();
        stale
    }

    fn lock_pulses(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.pulses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
