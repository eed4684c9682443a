//! Wake-up scheduling.
//!
//! Each session with a running phase owns one named one-shot timer, named
//! from its problem key, that fires at the phase's `end_at`. Firing only
//! prompts settlement; settlement itself reads the real clock, so a timer
//! that fires late (or never, because the host was asleep) is harmless.

mod tokio_timers;

pub use tokio_timers::TokioScheduler;

/// Every wake-up this crate arms starts with this prefix.
pub const ALARM_PREFIX: &str = "pomo::";

/// Deterministic wake-up name for a problem key.
pub fn alarm_name(problem_key: &str) -> String {
    format!("{ALARM_PREFIX}{problem_key}")
}

/// The problem key a wake-up belongs to, or `None` for foreign timers.
pub fn problem_key_from_alarm(name: &str) -> Option<&str> {
    name.strip_prefix(ALARM_PREFIX)
}

pub trait WakeupScheduler: Send + Sync {
    /// Arm `name` to fire at `at_ms` (epoch ms), replacing any earlier timer
    /// with the same name.
    fn schedule(&self, name: &str, at_ms: u64);

    /// Disarm `name`. Clearing an unknown name is a no-op.
    fn clear(&self, name: &str);
}

/// Arms nothing. For one-shot processes that settle lazily on the next
/// invocation instead of waiting around for a timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullScheduler;

impl WakeupScheduler for NullScheduler {
    fn schedule(&self, _name: &str, _at_ms: u64) {}

    fn clear(&self, _name: &str) {}
}
