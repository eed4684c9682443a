use std::sync::Arc;

use clap::Subcommand;
use pomohud_core::protocol::{Ack, Response};
use pomohud_core::{Clock, Config, NullScheduler, SessionService, SqliteSessionStore};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a focus phase, or resume a paused one
    Start {
        /// Problem key
        problem_key: String,
        /// Focus length in minutes (default from config)
        #[arg(long)]
        focus: Option<u32>,
        /// Break length in minutes (default from config)
        #[arg(long = "break")]
        break_min: Option<u32>,
    },
    /// Pause a focus phase
    Pause {
        /// Problem key
        problem_key: String,
    },
    /// Print the session as JSON
    Get {
        /// Problem key
        problem_key: String,
    },
    /// Print the session with its pause cooldown as JSON
    State {
        /// Problem key
        problem_key: String,
    },
    /// Advance a session past any phase that has already ended
    Settle {
        /// Problem key
        problem_key: String,
    },
    /// Print every stored session, settled, as JSON
    List,
}

/// One-shot invocations keep no timers: the next invocation settles lazily.
pub fn run(
    action: SessionAction,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteSessionStore::open()?;
    let service =
        SessionService::from_config(config, Arc::new(store), Arc::new(NullScheduler), clock);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match action {
            SessionAction::Start {
                problem_key,
                focus,
                break_min,
            } => {
                let result = service.start(&problem_key, focus, break_min).await;
                print_ack(result)
            }
            SessionAction::Pause { problem_key } => print_ack(service.pause(&problem_key).await),
            SessionAction::Get { problem_key } => {
                let session = service.get(&problem_key).await;
                println!("{}", serde_json::to_string_pretty(&session)?);
                Ok(())
            }
            SessionAction::State { problem_key } => {
                let state = service.get_state(&problem_key).await;
                println!("{}", serde_json::to_string_pretty(&state)?);
                Ok(())
            }
            SessionAction::Settle { problem_key } => {
                let session = service.settle(&problem_key).await;
                println!("{}", serde_json::to_string_pretty(&session)?);
                Ok(())
            }
            SessionAction::List => {
                let keys: Vec<String> = service.snapshot().into_keys().collect();
                for key in &keys {
                    service.settle(key).await;
                }
                println!("{}", serde_json::to_string_pretty(&service.snapshot())?);
                Ok(())
            }
        }
    })
}

/// Print the reply, then fail the process on a refusal.
fn print_ack(
    result: Result<(), pomohud_core::Rejection>,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = Response::Ack(Ack::from(result));
    println!("{}", serde_json::to_string_pretty(&response)?);
    result.map_err(Into::into)
}
