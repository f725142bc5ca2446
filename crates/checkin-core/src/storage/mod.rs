mod cache;
mod config;
pub mod database;
pub mod migrations;

pub use cache::LocalCache;
pub use config::{
    CompletionSection, Config, HistorySection, RemoteSection, TimezoneSection,
};
pub use database::CompletionDb;

use std::path::PathBuf;

/// Returns `~/.config/checkin[-dev]/` based on CHECKIN_ENV.
///
/// Set CHECKIN_ENV=dev to use the development data directory, or
/// CHECKIN_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("CHECKIN_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("CHECKIN_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("checkin-dev")
            } else {
                base_dir.join("checkin")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
