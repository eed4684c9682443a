use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every state change in the system produces an Event.
/// Observers subscribe to the service's broadcast channel and re-query on
/// `SessionUpdated`; the phase-end events double as user notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        problem_key: String,
        end_at: u64,
        resumed: bool,
        at: DateTime<Utc>,
    },
    SessionPaused {
        problem_key: String,
        remaining_ms: u64,
        pauses_count: u32,
        at: DateTime<Utc>,
    },
    /// Focus ran out; the break is running until `break_end_at`.
    FocusEnded {
        problem_key: String,
        break_end_at: u64,
        at: DateTime<Utc>,
    },
    BreakEnded {
        problem_key: String,
        at: DateTime<Utc>,
    },
    /// The persisted record for `problem_key` changed.
    SessionUpdated { problem_key: String },
}

/// A user-facing notification derived from a phase-end event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Stable per key, so a newer notice replaces an older one.
    pub id: String,
    pub title: String,
    pub message: String,
}

impl Event {
    pub fn problem_key(&self) -> &str {
        match self {
            Event::SessionStarted { problem_key, .. }
            | Event::SessionPaused { problem_key, .. }
            | Event::FocusEnded { problem_key, .. }
            | Event::BreakEnded { problem_key, .. }
            | Event::SessionUpdated { problem_key } => problem_key,
        }
    }

    pub fn notice(&self) -> Option<Notice> {
        match self {
            Event::FocusEnded { problem_key, .. } => Some(Notice {
                id: format!("done-{problem_key}"),
                title: "Focus finished".into(),
                message: "Break time!".into(),
            }),
            Event::BreakEnded { problem_key, .. } => Some(Notice {
                id: format!("break-{problem_key}"),
                title: "Break finished".into(),
                message: "Ready for the next focus?".into(),
            }),
            _ => None,
        }
    }
}
