use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Focus length used when neither the request nor the record carries one.
pub const DEFAULT_FOCUS_MIN: u32 = 25;
/// Break length used when neither the request nor the record carries one.
pub const DEFAULT_BREAK_MIN: u32 = 5;

const MS_PER_MIN: u64 = 60 * 1000;

/// Problem key -> session. Ordered so the persisted JSON is stable.
pub type SessionTable = BTreeMap<String, Session>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Focus,
    Break,
    Paused,
}

impl SessionStatus {
    /// Focus and break are the only phases with a live `end_at`.
    pub fn is_timed(self) -> bool {
        matches!(self, SessionStatus::Focus | SessionStatus::Break)
    }
}

/// One tracked problem.
///
/// Timing fields are epoch milliseconds. `started_at`/`end_at` only mean
/// something while the status is focus or break; after a session returns to
/// idle they are left in place and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_min: Option<u32>,
    /// Time left in the focus phase when it was paused.
    #[serde(default)]
    pub remaining_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<u64>,
    #[serde(default)]
    pub pauses_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<u64>,
}

impl Session {
    /// The placeholder returned for keys that have never been started.
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            started_at: None,
            end_at: None,
            focus_min: None,
            break_min: None,
            remaining_ms: None,
            paused_at: None,
            pauses_count: 0,
            cooldown_until: None,
        }
    }

    /// When the current phase expires, if the phase expires at all.
    pub fn wakeup_at(&self) -> Option<u64> {
        if self.status.is_timed() {
            self.end_at
        } else {
            None
        }
    }

    pub fn focus_ms(&self) -> u64 {
        minutes_to_ms(self.focus_min.unwrap_or(DEFAULT_FOCUS_MIN))
    }

    pub fn break_ms(&self) -> u64 {
        minutes_to_ms(self.break_min.unwrap_or(DEFAULT_BREAK_MIN))
    }

    /// Milliseconds until pausing is allowed again; 0 when no cooldown applies.
    pub fn cooldown_remaining(&self, now: u64) -> u64 {
        self.cooldown_until
            .map(|until| until.saturating_sub(now))
            .unwrap_or(0)
    }
}

/// Minutes to milliseconds; every `u32` input fits without overflow.
pub fn minutes_to_ms(minutes: u32) -> u64 {
    u64::from(minutes).saturating_mul(MS_PER_MIN)
}
