mod machine;
mod policy;
mod types;

pub use machine::{settle, Rejection, SessionMachine, StartRequest, Transition};
pub use policy::{RestartPolicy, SessionPolicy};
pub use types::{
    minutes_to_ms, Session, SessionStatus, SessionTable, DEFAULT_BREAK_MIN, DEFAULT_FOCUS_MIN,
};
