use std::sync::Arc;

use clap::{Parser, Subcommand};
use pomohud_core::{Clock, Config, ManualClock, SystemClock};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pomohud", version, about = "Per-problem focus/break sessions")]
struct Cli {
    /// Pin the clock to this epoch-millisecond timestamp (for replays)
    #[arg(long, global = true, hide = true)]
    now: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start, pause and query sessions
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Serve JSON requests on stdin, with live wake-ups, until EOF
    Serve,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env("POMOHUD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let loaded = Config::load();
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };
    init_tracing(&config.log.filter);
    if let Err(e) = &loaded {
        tracing::warn!(error = %e, "using default configuration");
    }

    let clock: Arc<dyn Clock> = match cli.now {
        Some(ms) => Arc::new(ManualClock::new(ms)),
        None => Arc::new(SystemClock),
    };

    let result = match cli.command {
        Commands::Session { action } => commands::session::run(action, &config, clock),
        Commands::Serve => commands::serve::run(&config, clock),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
