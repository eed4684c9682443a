//! Session state machine.
//!
//! Every transition is a pure function of `(prior session, command, now)`.
//! Nothing here reads the clock, touches storage, or arms timers; the
//! service does that around these calls.
//!
//! ## State Transitions
//!
//! ```text
//! idle --start--> focus --pause--> paused --start--> focus
//! focus --[end_at passed]--> break --[end_at passed]--> idle
//! ```
//!
//! There is no direct focus -> idle edge.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::policy::{RestartPolicy, SessionPolicy};
use super::types::{minutes_to_ms, Session, SessionStatus};
use crate::clock::to_datetime;
use crate::events::Event;

/// Why a command was refused. The session is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "kebab-case")]
pub enum Rejection {
    #[error("session has been paused too many times")]
    TooManyPauses,
    #[error("session is not in focus")]
    NotInFocus,
    #[error("pause is on cooldown for another {remaining_ms} ms")]
    Cooldown {
        #[serde(rename = "cooldownRemaining")]
        remaining_ms: u64,
    },
    #[error("focus segment too short to resume, {remaining_ms} ms left")]
    MinSegment {
        #[serde(rename = "segmentRemaining")]
        remaining_ms: u64,
    },
    #[error("session is already running")]
    AlreadyActive,
}

impl Rejection {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::TooManyPauses => "too-many-pauses",
            Rejection::NotInFocus => "not-in-focus",
            Rejection::Cooldown { .. } => "cooldown",
            Rejection::MinSegment { .. } => "min-segment",
            Rejection::AlreadyActive => "already-active",
        }
    }
}

/// Durations requested by a `start` command, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest {
    pub focus_min: u32,
    pub break_min: u32,
}

/// The session after a command or settlement, with what happened on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub session: Session,
    pub events: Vec<Event>,
}

impl Transition {
    /// Settlement with nothing to do yields no events.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    policy: SessionPolicy,
}

impl SessionMachine {
    pub fn new(policy: SessionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a fresh focus phase, or resume a paused one.
    ///
    /// `prior` must already be settled at `now`.
    pub fn start(
        &self,
        problem_key: &str,
        prior: Option<&Session>,
        request: StartRequest,
        now: u64,
    ) -> Result<Transition, Rejection> {
        match prior {
            Some(paused) if paused.status == SessionStatus::Paused => {
                self.resume(problem_key, paused, request, now)
            }
            Some(running)
                if running.status.is_timed()
                    && self.policy.restart_policy == RestartPolicy::Reject =>
            {
                Err(Rejection::AlreadyActive)
            }
            _ => Ok(self.fresh_focus(problem_key, prior, request, now)),
        }
    }

    /// Pause a focus phase, snapshotting the time it had left.
    pub fn pause(
        &self,
        problem_key: &str,
        prior: Option<&Session>,
        now: u64,
    ) -> Result<Transition, Rejection> {
        let current = match prior {
            Some(session) if session.status == SessionStatus::Focus => session,
            _ => return Err(Rejection::NotInFocus),
        };

        let cooldown = current.cooldown_remaining(now);
        if cooldown > 0 {
            return Err(Rejection::Cooldown {
                remaining_ms: cooldown,
            });
        }

        let remaining_ms = current.end_at.unwrap_or(0).saturating_sub(now);
        let session = Session {
            status: SessionStatus::Paused,
            remaining_ms: Some(remaining_ms),
            paused_at: Some(now),
            pauses_count: current.pauses_count.saturating_add(1),
            ..current.clone()
        };
        debug!(problem_key, remaining_ms, pauses = session.pauses_count, "session paused");

        Ok(Transition {
            events: vec![Event::SessionPaused {
                problem_key: problem_key.to_string(),
                remaining_ms,
                pauses_count: session.pauses_count,
                at: to_datetime(now),
            }],
            session,
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn fresh_focus(
        &self,
        problem_key: &str,
        prior: Option<&Session>,
        request: StartRequest,
        now: u64,
    ) -> Transition {
        let end_at = now.saturating_add(minutes_to_ms(request.focus_min));
        let session = Session {
            status: SessionStatus::Focus,
            started_at: Some(now),
            end_at: Some(end_at),
            focus_min: Some(request.focus_min),
            break_min: Some(request.break_min),
            remaining_ms: None,
            paused_at: None,
            pauses_count: prior.map(|s| s.pauses_count).unwrap_or(0),
            cooldown_until: Some(now.saturating_add(self.policy.cooldown_ms)),
        };
        debug!(problem_key, end_at, "focus started");

        Transition {
            events: vec![Event::SessionStarted {
                problem_key: problem_key.to_string(),
                end_at,
                resumed: false,
                at: to_datetime(now),
            }],
            session,
        }
    }

    fn resume(
        &self,
        problem_key: &str,
        paused: &Session,
        request: StartRequest,
        now: u64,
    ) -> Result<Transition, Rejection> {
        if paused.pauses_count > self.policy.max_pauses {
            return Err(Rejection::TooManyPauses);
        }

        let segment_left = paused
            .started_at
            .map(|started| {
                started
                    .saturating_add(self.policy.min_segment_ms)
                    .saturating_sub(now)
            })
            .unwrap_or(0);
        if segment_left > 0 {
            if self.policy.enforce_min_segment {
                return Err(Rejection::MinSegment {
                    remaining_ms: segment_left,
                });
            }
            debug!(problem_key, segment_left, "resuming inside minimum segment");
        }

        let duration_ms = paused.remaining_ms.unwrap_or_else(|| {
            minutes_to_ms(paused.focus_min.unwrap_or(request.focus_min))
        });
        let end_at = now.saturating_add(duration_ms);
        // Resume keeps the first start as the anchor.
        let started_at = paused
            .started_at
            .filter(|&started| started <= now)
            .unwrap_or(now);

        let session = Session {
            status: SessionStatus::Focus,
            started_at: Some(started_at),
            end_at: Some(end_at),
            focus_min: Some(request.focus_min),
            break_min: Some(request.break_min),
            remaining_ms: None,
            paused_at: None,
            pauses_count: paused.pauses_count,
            cooldown_until: Some(now.saturating_add(self.policy.cooldown_ms)),
        };
        debug!(problem_key, end_at, duration_ms, "focus resumed");

        Ok(Transition {
            events: vec![Event::SessionStarted {
                problem_key: problem_key.to_string(),
                end_at,
                resumed: true,
                at: to_datetime(now),
            }],
            session,
        })
    }
}

/// Advance `session` past every phase boundary that `now` has crossed.
///
/// Repeats until nothing changes, so a focus phase whose break has also run
/// out lands on idle in one call. Calling it again with the same or a later
/// `now` and no command in between is a no-op.
pub fn settle(problem_key: &str, session: &Session, now: u64) -> Transition {
    let mut current = session.clone();
    let mut events = Vec::new();
    while let Some(event) = settle_step(problem_key, &mut current, now) {
        events.push(event);
    }
    Transition {
        session: current,
        events,
    }
}

fn settle_step(problem_key: &str, session: &mut Session, now: u64) -> Option<Event> {
    let end_at = session.end_at?;
    if now < end_at {
        return None;
    }

    match session.status {
        SessionStatus::Focus => {
            let break_ms = session.break_ms();
            let missed_break_end = end_at.saturating_add(break_ms);
            // A break that would already be over if it had started on time is
            // anchored at the focus end so the next step closes it. Otherwise
            // the user gets a full break from now.
            let (break_start, break_end) = if now >= missed_break_end {
                (end_at, missed_break_end)
            } else {
                (now, now.saturating_add(break_ms))
            };
            session.status = SessionStatus::Break;
            session.started_at = Some(break_start);
            session.end_at = Some(break_end);
            Some(Event::FocusEnded {
                problem_key: problem_key.to_string(),
                break_end_at: break_end,
                at: to_datetime(now),
            })
        }
        SessionStatus::Break => {
            session.status = SessionStatus::Idle;
            Some(Event::BreakEnded {
                problem_key: problem_key.to_string(),
                at: to_datetime(now),
            })
        }
        SessionStatus::Idle | SessionStatus::Paused => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "p1";
    const REQ: StartRequest = StartRequest {
        focus_min: 25,
        break_min: 5,
    };

    fn machine() -> SessionMachine {
        SessionMachine::default()
    }

    fn focus_at(now: u64) -> Session {
        machine().start(KEY, None, REQ, now).unwrap().session
    }

    #[test]
    fn start_from_nothing_enters_focus() {
        let t = machine().start(KEY, None, REQ, 0).unwrap();
        assert_eq!(t.session.status, SessionStatus::Focus);
        assert_eq!(t.session.started_at, Some(0));
        assert_eq!(t.session.end_at, Some(1_500_000));
        assert_eq!(t.session.cooldown_until, Some(300_000));
        assert_eq!(t.session.pauses_count, 0);
        assert!(matches!(
            t.events.as_slice(),
            [Event::SessionStarted { resumed: false, .. }]
        ));
    }

    #[test]
    fn start_from_idle_keeps_pause_count() {
        let idle = Session {
            pauses_count: 2,
            ..Session::idle()
        };
        let t = machine().start(KEY, Some(&idle), REQ, 10).unwrap();
        assert_eq!(t.session.pauses_count, 2);
        assert_eq!(t.session.remaining_ms, None);
    }

    #[test]
    fn pause_without_session_is_not_in_focus() {
        assert_eq!(
            machine().pause(KEY, None, 0).unwrap_err(),
            Rejection::NotInFocus
        );
    }

    #[test]
    fn pause_during_cooldown_reports_remaining() {
        let session = focus_at(0);
        assert_eq!(
            machine().pause(KEY, Some(&session), 60_000).unwrap_err(),
            Rejection::Cooldown {
                remaining_ms: 240_000
            }
        );
    }

    #[test]
    fn pause_exactly_at_cooldown_end_succeeds() {
        let session = focus_at(0);
        let t = machine().pause(KEY, Some(&session), 300_000).unwrap();
        assert_eq!(t.session.status, SessionStatus::Paused);
        assert_eq!(t.session.remaining_ms, Some(1_200_000));
    }

    #[test]
    fn pause_while_paused_is_not_in_focus() {
        let session = focus_at(0);
        let paused = machine().pause(KEY, Some(&session), 300_000).unwrap().session;
        assert_eq!(
            machine().pause(KEY, Some(&paused), 400_000).unwrap_err(),
            Rejection::NotInFocus
        );
    }

    #[test]
    fn resume_uses_remaining_time_and_keeps_anchor() {
        let session = focus_at(0);
        let paused = machine().pause(KEY, Some(&session), 300_000).unwrap().session;
        let t = machine().start(KEY, Some(&paused), REQ, 500_000).unwrap();
        assert_eq!(t.session.status, SessionStatus::Focus);
        assert_eq!(t.session.started_at, Some(0));
        assert_eq!(t.session.end_at, Some(500_000 + 1_200_000));
        assert_eq!(t.session.cooldown_until, Some(800_000));
        assert_eq!(t.session.pauses_count, 1);
        assert!(matches!(
            t.events.as_slice(),
            [Event::SessionStarted { resumed: true, .. }]
        ));
    }

    #[test]
    fn resume_without_snapshot_falls_back_to_focus_length() {
        let paused = Session {
            status: SessionStatus::Paused,
            focus_min: Some(10),
            pauses_count: 1,
            ..Session::idle()
        };
        let t = machine().start(KEY, Some(&paused), REQ, 1_000).unwrap();
        assert_eq!(t.session.end_at, Some(1_000 + 600_000));
        assert_eq!(t.session.started_at, Some(1_000));
    }

    #[test]
    fn third_resume_is_rejected() {
        let paused = Session {
            status: SessionStatus::Paused,
            remaining_ms: Some(60_000),
            pauses_count: 3,
            ..Session::idle()
        };
        assert_eq!(
            machine().start(KEY, Some(&paused), REQ, 0).unwrap_err(),
            Rejection::TooManyPauses
        );
    }

    #[test]
    fn min_segment_only_blocks_when_enforced() {
        let session = focus_at(0);
        let paused = machine().pause(KEY, Some(&session), 300_000).unwrap().session;

        let lenient = SessionMachine::new(SessionPolicy {
            min_segment_ms: 600_000,
            ..SessionPolicy::default()
        });
        assert!(lenient.start(KEY, Some(&paused), REQ, 310_000).is_ok());

        let strict = SessionMachine::new(SessionPolicy {
            min_segment_ms: 600_000,
            enforce_min_segment: true,
            ..SessionPolicy::default()
        });
        assert_eq!(
            strict.start(KEY, Some(&paused), REQ, 310_000).unwrap_err(),
            Rejection::MinSegment {
                remaining_ms: 290_000
            }
        );
    }

    #[test]
    fn restart_while_running_follows_policy() {
        let running = focus_at(0);

        let t = machine().start(KEY, Some(&running), REQ, 100_000).unwrap();
        assert_eq!(t.session.started_at, Some(100_000));
        assert_eq!(t.session.end_at, Some(1_600_000));

        let strict = SessionMachine::new(SessionPolicy {
            restart_policy: RestartPolicy::Reject,
            ..SessionPolicy::default()
        });
        assert_eq!(
            strict.start(KEY, Some(&running), REQ, 100_000).unwrap_err(),
            Rejection::AlreadyActive
        );
    }

    #[test]
    fn settle_before_end_is_noop() {
        let session = focus_at(0);
        let t = settle(KEY, &session, 1_499_999);
        assert!(t.is_noop());
        assert_eq!(t.session, session);
    }

    #[test]
    fn settle_focus_starts_full_break_from_now() {
        let session = focus_at(0);
        let t = settle(KEY, &session, 1_600_000);
        assert_eq!(t.session.status, SessionStatus::Break);
        assert_eq!(t.session.started_at, Some(1_600_000));
        assert_eq!(t.session.end_at, Some(1_900_000));
        assert!(t.session.cooldown_until.is_some());
        assert_eq!(t.events.len(), 1);
    }

    #[test]
    fn settle_fast_forwards_through_missed_break() {
        let session = focus_at(0);
        let t = settle(KEY, &session, 10_000_000);
        assert_eq!(t.session.status, SessionStatus::Idle);
        assert!(matches!(
            t.events.as_slice(),
            [Event::FocusEnded { .. }, Event::BreakEnded { .. }]
        ));
    }

    #[test]
    fn settle_is_idempotent_after_idle() {
        let session = focus_at(0);
        let once = settle(KEY, &session, 10_000_000);
        let twice = settle(KEY, &once.session, 10_000_000);
        assert!(twice.is_noop());
        assert_eq!(twice.session, once.session);
    }

    #[test]
    fn settle_leaves_paused_alone() {
        let session = focus_at(0);
        let paused = machine().pause(KEY, Some(&session), 300_000).unwrap().session;
        assert!(settle(KEY, &paused, u64::MAX).is_noop());
    }

    #[test]
    fn rejection_codes_match_wire_names() {
        assert_eq!(Rejection::TooManyPauses.code(), "too-many-pauses");
        assert_eq!(Rejection::NotInFocus.code(), "not-in-focus");
        assert_eq!(Rejection::Cooldown { remaining_ms: 1 }.code(), "cooldown");
        let json = serde_json::to_value(Rejection::Cooldown { remaining_ms: 5 }).unwrap();
        assert_eq!(json, serde_json::json!({"error": "cooldown", "cooldownRemaining": 5}));
    }
}
