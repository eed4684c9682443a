use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::WakeupScheduler;
use crate::clock::Clock;

/// Wake-ups backed by tokio timers.
///
/// A fired timer sends its name down the channel returned by
/// [`TokioScheduler::new`]; the host feeds those names to
/// [`crate::service::SessionService::on_wakeup`].
pub struct TokioScheduler {
    clock: Arc<dyn Clock>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    fired: mpsc::UnboundedSender<String>,
}

impl TokioScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            clock,
            timers: Mutex::new(HashMap::new()),
            fired,
        };
        (scheduler, rx)
    }

    /// Whether `name` is armed and has not fired yet.
    pub fn is_armed(&self, name: &str) -> bool {
        self.timers
            .lock()
            .map(|timers| timers.get(name).is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Names of timers still waiting to fire.
    pub fn armed(&self) -> Vec<String> {
        let Ok(timers) = self.timers.lock() else {
            return Vec::new();
        };
        let mut names: Vec<String> = timers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl WakeupScheduler for TokioScheduler {
    fn schedule(&self, name: &str, at_ms: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(alarm = name, "no tokio runtime, wake-up not armed");
            return;
        };

        let delay = Duration::from_millis(at_ms.saturating_sub(self.clock.now_ms()));
        let fired = self.fired.clone();
        let alarm = name.to_string();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone only when the host is shutting down.
            let _ = fired.send(alarm);
        });

        debug!(alarm = name, at_ms, delay_ms = delay.as_millis() as u64, "wake-up armed");
        match self.timers.lock() {
            Ok(mut timers) => {
                if let Some(previous) = timers.insert(name.to_string(), handle) {
                    previous.abort();
                }
            }
            Err(_) => handle.abort(),
        }
    }

    fn clear(&self, name: &str) {
        if let Ok(mut timers) = self.timers.lock() {
            if let Some(handle) = timers.remove(name) {
                handle.abort();
                debug!(alarm = name, "wake-up cleared");
            }
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.get_mut() {
            for handle in timers.values() {
                handle.abort();
            }
        }
    }
}
