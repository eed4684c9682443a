//! Property tests for settlement and the pause/resume rules.

use pomohud_core::session::{
    settle, Session, SessionMachine, SessionStatus, StartRequest,
};
use proptest::prelude::*;

const KEY: &str = "prop";

fn status() -> impl Strategy<Value = SessionStatus> {
    prop_oneof![
        Just(SessionStatus::Idle),
        Just(SessionStatus::Focus),
        Just(SessionStatus::Break),
        Just(SessionStatus::Paused),
    ]
}

prop_compose! {
    fn any_session()(
        status in status(),
        started_at in 0u64..10_000_000,
        len in 0u64..5_000_000,
        break_min in proptest::option::of(0u32..120),
        pauses_count in 0u32..5,
    ) -> Session {
        Session {
            status,
            started_at: Some(started_at),
            end_at: Some(started_at + len),
            focus_min: Some(25),
            break_min,
            remaining_ms: None,
            paused_at: None,
            pauses_count,
            cooldown_until: Some(started_at + 300_000),
        }
    }
}

proptest! {
    #[test]
    fn settling_twice_equals_settling_once(session in any_session(), now in 0u64..30_000_000) {
        let once = settle(KEY, &session, now);
        let twice = settle(KEY, &once.session, now);
        prop_assert!(twice.is_noop());
        prop_assert_eq!(twice.session, once.session);
    }

    #[test]
    fn settling_later_never_rewinds(session in any_session(), now in 0u64..30_000_000, later in 0u64..30_000_000) {
        let first = settle(KEY, &session, now).session;
        let second = settle(KEY, &first, now + later).session;
        let rank = |s: SessionStatus| match s {
            SessionStatus::Focus => 0,
            SessionStatus::Break => 1,
            SessionStatus::Idle => 2,
            SessionStatus::Paused => 3,
        };
        if first.status != SessionStatus::Paused {
            prop_assert!(rank(second.status) >= rank(first.status));
        }
    }

    #[test]
    fn focus_always_reaches_idle_eventually(
        start in 0u64..10_000_000,
        focus_min in 0u32..180,
        break_min in 0u32..60,
        slack in 0u64..100_000_000,
    ) {
        let machine = SessionMachine::default();
        let session = machine
            .start(KEY, None, StartRequest { focus_min, break_min }, start)
            .unwrap()
            .session;
        let focus_end = session.end_at.unwrap();
        let now = focus_end + u64::from(break_min) * 60_000 + slack;
        prop_assert_eq!(settle(KEY, &session, now).session.status, SessionStatus::Idle);
    }

    #[test]
    fn timed_phases_keep_end_after_start(session in any_session(), now in 0u64..30_000_000) {
        let settled = settle(KEY, &session, now).session;
        if settled.status.is_timed() {
            prop_assert!(settled.end_at.unwrap() >= settled.started_at.unwrap());
        }
    }

    #[test]
    fn pause_then_resume_preserves_remaining(
        focus_min in 6u32..120,
        pause_offset in 300_000u64..360_000,
        idle_gap in 0u64..10_000_000,
    ) {
        let machine = SessionMachine::default();
        let req = StartRequest { focus_min, break_min: 5 };
        let focus = machine.start(KEY, None, req, 0).unwrap().session;
        let paused = machine.pause(KEY, Some(&focus), pause_offset).unwrap().session;
        let left = focus.end_at.unwrap() - pause_offset;
        prop_assert_eq!(paused.remaining_ms, Some(left));

        let resume_at = pause_offset + idle_gap;
        let resumed = machine.start(KEY, Some(&paused), req, resume_at).unwrap().session;
        prop_assert_eq!(resumed.end_at.unwrap() - resume_at, left);
        prop_assert_eq!(resumed.cooldown_until, Some(resume_at + 300_000));
        prop_assert!(resumed.pauses_count >= paused.pauses_count);
    }
}
