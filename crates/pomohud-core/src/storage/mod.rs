mod config;
pub mod database;
pub mod session_store;

pub use config::{Config, SessionConfig};
pub use database::Database;
pub use session_store::{MemorySessionStore, SessionStore, SqliteSessionStore, SESSIONS_KEY};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `POMOHUD_DATA_DIR` wins when set. Otherwise `~/.config/pomohud[-dev]/`,
/// with the `-dev` suffix selected by `POMOHUD_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("POMOHUD_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("POMOHUD_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("pomohud-dev")
            } else {
                base_dir.join("pomohud")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::DataDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}
