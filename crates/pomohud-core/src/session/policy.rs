//! Policy knobs consulted by the state machine.

use serde::{Deserialize, Serialize};

use super::types::minutes_to_ms;

/// What `start` does when the session is already in focus or break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Throw the running phase away and begin a fresh focus phase.
    #[default]
    Recreate,
    /// Refuse with `already-active`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Grace window after entering focus during which pause is refused.
    pub cooldown_ms: u64,
    /// Resume is refused once a session has been paused more than this.
    pub max_pauses: u32,
    /// Minimum time since `started_at` before a paused session may resume.
    pub min_segment_ms: u64,
    /// The minimum-segment check is always evaluated; it only blocks when set.
    pub enforce_min_segment: bool,
    pub restart_policy: RestartPolicy,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            cooldown_ms: minutes_to_ms(5),
            max_pauses: 2,
            min_segment_ms: minutes_to_ms(5),
            enforce_min_segment: false,
            restart_policy: RestartPolicy::Recreate,
        }
    }
}
