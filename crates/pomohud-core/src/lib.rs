//! # pomohud Core Library
//!
//! Per-problem focus/break ("pomodoro") sessions for a coding-practice
//! heads-up display. A UI sends start/pause/query requests keyed by an opaque
//! problem key; this crate keeps the session table, enforces the pause
//! policy, and moves sessions through their phases as wall-clock time passes.
//!
//! ## Architecture
//!
//! - **Session State Machine**: pure transitions of `(prior, command, now)`,
//!   plus [`session::settle`], which advances a session past every phase
//!   boundary `now` has crossed
//! - **Storage**: the session table persisted wholesale in SQLite, and
//!   TOML-based configuration
//! - **Scheduler**: one named wake-up per running session; a late or missed
//!   wake-up only delays a settlement that every read performs anyway
//! - **Service**: serializes commands per key and broadcasts changes
//!
//! ## Key Components
//!
//! - [`SessionService`]: the request handler hosts embed
//! - [`SessionMachine`]: start / pause / resume rules
//! - [`SessionStore`]: persistence seam
//! - [`Config`]: default durations and pause policy

pub mod clock;
pub mod error;
pub mod events;
pub mod protocol;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, ProtocolError};
pub use events::{Event, Notice};
pub use protocol::{Envelope, Reply, Request, Response};
pub use scheduler::{NullScheduler, TokioScheduler, WakeupScheduler};
pub use service::SessionService;
pub use session::{Rejection, Session, SessionMachine, SessionPolicy, SessionStatus};
pub use storage::{Config, Database, MemorySessionStore, SessionStore, SqliteSessionStore};
