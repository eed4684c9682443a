//! The session service: store, state machine, wake-ups and broadcast wired
//! together behind the four request types.
//!
//! Every command runs the same cycle under a per-key async lock:
//!
//! 1. load the table
//! 2. settle the key's session against the current time
//! 3. apply the command to the settled session
//! 4. save the table if anything changed
//! 5. broadcast, then re-arm or clear the key's wake-up
//!
//! The per-key lock linearizes commands on one key, including their wake-up
//! bookkeeping. Steps 1-4 are one [`SessionStore::update`] on the blocking
//! pool, under a table lock, because the table is saved wholesale and two
//! keys must not overwrite each other's writes. The SQLite store makes that
//! update a single transaction, which extends the guarantee across
//! processes sharing one database file.
//!
//! A table that cannot be loaded is never saved over. The command is
//! answered from an empty table instead and the store is left as it was.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::events::Event;
use crate::protocol::{Ack, Envelope, Reply, Request, Response, StateReply};
use crate::scheduler::{alarm_name, problem_key_from_alarm, WakeupScheduler};
use crate::session::{
    settle, Rejection, Session, SessionMachine, SessionPolicy, SessionTable, StartRequest,
    Transition, DEFAULT_BREAK_MIN, DEFAULT_FOCUS_MIN,
};
use crate::storage::{Config, SessionStore};

const EVENT_CAPACITY: usize = 256;

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    scheduler: Arc<dyn WakeupScheduler>,
    clock: Arc<dyn Clock>,
    machine: SessionMachine,
    defaults: StartRequest,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    table_lock: Arc<Mutex<()>>,
    events: broadcast::Sender<Event>,
}

/// What one serialized command left behind.
struct Committed<T> {
    result: T,
    session: Option<Session>,
    events: Vec<Event>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        scheduler: Arc<dyn WakeupScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            scheduler,
            clock,
            machine: SessionMachine::default(),
            defaults: StartRequest {
                focus_min: DEFAULT_FOCUS_MIN,
                break_min: DEFAULT_BREAK_MIN,
            },
            key_locks: Mutex::new(HashMap::new()),
            table_lock: Arc::new(Mutex::new(())),
            events,
        }
    }

    /// Policy and default durations taken from `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn SessionStore>,
        scheduler: Arc<dyn WakeupScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(store, scheduler, clock)
            .with_policy(config.policy())
            .with_defaults(config.start_request(None, None))
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.machine = SessionMachine::new(policy);
        self
    }

    /// Durations used when a `start` omits them.
    pub fn with_defaults(mut self, defaults: StartRequest) -> Self {
        self.defaults = defaults;
        self
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a fresh focus phase, or resume a paused one.
    pub async fn start(
        &self,
        problem_key: &str,
        focus_min: Option<u32>,
        break_min: Option<u32>,
    ) -> Result<(), Rejection> {
        let request = StartRequest {
            focus_min: focus_min.unwrap_or(self.defaults.focus_min),
            break_min: break_min.unwrap_or(self.defaults.break_min),
        };
        let machine = self.machine.clone();
        let key = problem_key.to_string();
        self.run(problem_key, move |current, now| {
            split(machine.start(&key, current, request, now))
        })
        .await
    }

    pub async fn pause(&self, problem_key: &str) -> Result<(), Rejection> {
        let machine = self.machine.clone();
        let key = problem_key.to_string();
        self.run(problem_key, move |current, now| {
            split(machine.pause(&key, current, now))
        })
        .await
    }

    /// The settled session, or an idle placeholder for unknown keys.
    pub async fn get(&self, problem_key: &str) -> Session {
        self.run(problem_key, |current, _| {
            (current.cloned().unwrap_or_else(Session::idle), None)
        })
        .await
    }

    /// The settled session plus how long pause stays locked.
    pub async fn get_state(&self, problem_key: &str) -> StateReply {
        self.run(problem_key, |current, now| {
            let reply = StateReply {
                ok: true,
                state: current.cloned(),
                cooldown_remaining: current.map_or(0, |s| s.cooldown_remaining(now)),
            };
            (reply, None)
        })
        .await
    }

    /// Settle one key against the current time. `None` for unknown keys.
    pub async fn settle(&self, problem_key: &str) -> Option<Session> {
        self.run(problem_key, |current, _| (current.cloned(), None))
            .await
    }

    /// Handle a fired wake-up. Timers this crate did not name are ignored.
    pub async fn on_wakeup(&self, alarm: &str) -> Option<Session> {
        let Some(problem_key) = problem_key_from_alarm(alarm) else {
            debug!(alarm, "ignoring foreign wake-up");
            return None;
        };
        self.settle(problem_key).await
    }

    /// Settle every stored session and re-arm wake-ups for running phases.
    ///
    /// For hosts that start with no timers armed, e.g. after a restart.
    /// Returns how many wake-ups were armed.
    pub async fn restore(&self) -> usize {
        let keys: Vec<String> = self.load_table().into_keys().collect();
        let mut armed = 0;
        for key in keys {
            let session = self
                .cycle(&key, Arm::Always, |current, _| (current.cloned(), None))
                .await;
            if session.as_ref().and_then(Session::wakeup_at).is_some() {
                armed += 1;
            }
        }
        info!(armed, "session table restored");
        armed
    }

    /// The stored table as-is, without settling.
    pub fn snapshot(&self) -> SessionTable {
        self.load_table()
    }

    /// Dispatch a decoded request.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Start {
                problem_key,
                focus_min,
                break_min,
            } => Response::Ack(Ack::from(
                self.start(&problem_key, focus_min, break_min).await,
            )),
            Request::Pause { problem_key } => {
                Response::Ack(Ack::from(self.pause(&problem_key).await))
            }
            Request::Get { problem_key } => Response::Session(self.get(&problem_key).await),
            Request::GetState { problem_key } => {
                Response::State(self.get_state(&problem_key).await)
            }
        }
    }

    pub async fn handle_envelope(&self, envelope: Envelope) -> Reply {
        Reply {
            id: envelope.id,
            response: self.handle(envelope.request).await,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn run<T, F>(&self, problem_key: &str, apply: F) -> T
    where
        T: Send + 'static,
        F: FnMut(Option<&Session>, u64) -> (T, Option<Transition>) + Send + 'static,
    {
        self.cycle(problem_key, Arm::OnChange, apply).await
    }

    async fn cycle<T, F>(&self, problem_key: &str, arm: Arm, apply: F) -> T
    where
        T: Send + 'static,
        F: FnMut(Option<&Session>, u64) -> (T, Option<Transition>) + Send + 'static,
    {
        let lock = self.key_lock(problem_key);
        let _guard = lock.lock().await;

        let now = self.clock.now_ms();
        let store = self.store.clone();
        let table_lock = self.table_lock.clone();
        let key = problem_key.to_string();
        let committed =
            tokio::task::spawn_blocking(move || commit(&*store, &table_lock, &key, now, apply))
                .await
                .unwrap_or_else(|e| std::panic::resume_unwind(e.into_panic()));

        let changed = !committed.events.is_empty();
        if changed {
            self.publish(problem_key, committed.events);
        }
        if changed || arm == Arm::Always {
            self.arm(problem_key, committed.session.as_ref());
        }
        committed.result
    }

    fn key_lock(&self, problem_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(problem_key.to_string()).or_default().clone()
    }

    fn load_table(&self) -> SessionTable {
        self.store.load_all().unwrap_or_else(|e| {
            warn!(error = %e, "session store unreadable, treating as empty");
            SessionTable::new()
        })
    }

    fn publish(&self, problem_key: &str, events: Vec<Event>) {
        for event in events {
            if let Some(notice) = event.notice() {
                info!(problem_key, notice = %notice.id, "{}", notice.title);
            }
            // No subscribers is fine; nobody is watching this key.
            let _ = self.events.send(event);
        }
        let _ = self.events.send(Event::SessionUpdated {
            problem_key: problem_key.to_string(),
        });
    }

    fn arm(&self, problem_key: &str, session: Option<&Session>) {
        let alarm = alarm_name(problem_key);
        match session.and_then(Session::wakeup_at) {
            Some(at) => self.scheduler.schedule(&alarm, at),
            None => self.scheduler.clear(&alarm),
        }
    }
}

/// When a command cycle touches the key's wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arm {
    /// Only if the session changed.
    OnChange,
    /// Every time, for hosts starting with no timers.
    Always,
}

/// Steps 1-4 of a command. Blocking; runs on the blocking pool.
fn commit<T>(
    store: &dyn SessionStore,
    table_lock: &Mutex<()>,
    problem_key: &str,
    now: u64,
    mut apply: impl FnMut(Option<&Session>, u64) -> (T, Option<Transition>),
) -> Committed<T> {
    let _table = table_lock.lock().unwrap_or_else(PoisonError::into_inner);

    let mut outcome = None;
    let saved = store.update(&mut |table| {
        let committed = apply_to(table, problem_key, now, &mut apply);
        let changed = !committed.events.is_empty();
        outcome = Some(committed);
        changed
    });

    match (saved, outcome) {
        (Ok(_), Some(committed)) => committed,
        (Err(e), Some(committed)) => {
            error!(problem_key, error = %e, "failed to persist session table");
            committed
        }
        (saved, None) => {
            if let Err(e) = saved {
                error!(
                    problem_key,
                    error = %e,
                    "session store unreadable, answering from an empty table without saving"
                );
            }
            apply_to(&mut SessionTable::new(), problem_key, now, &mut apply)
        }
    }
}

/// Settle the key, apply the command, and write the result into `table`
/// if anything happened.
fn apply_to<T>(
    table: &mut SessionTable,
    problem_key: &str,
    now: u64,
    apply: &mut impl FnMut(Option<&Session>, u64) -> (T, Option<Transition>),
) -> Committed<T> {
    let mut events = Vec::new();
    let mut current = table.get(problem_key).cloned();
    if let Some(prior) = current.take() {
        let settled = settle(problem_key, &prior, now);
        events.extend(settled.events);
        current = Some(settled.session);
    }

    let (result, transition) = apply(current.as_ref(), now);
    if let Some(transition) = transition {
        events.extend(transition.events);
        current = Some(transition.session);
    }

    if !events.is_empty() {
        if let Some(session) = &current {
            table.insert(problem_key.to_string(), session.clone());
        }
    }

    Committed {
        result,
        session: current,
        events,
    }
}

fn split(result: Result<Transition, Rejection>) -> (Result<(), Rejection>, Option<Transition>) {
    match result {
        Ok(transition) => (Ok(()), Some(transition)),
        Err(rejection) => (Err(rejection), None),
    }
}
