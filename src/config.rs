//! Ambient engine configuration: working directory, state file location,
//! lock retry policy, and verbosity. Not part of the specified core, but
//! every concrete deployment of it needs these knobs wired from somewhere
//! (here, CLI flags — see `main.rs::Cli`).

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCK_MAX_RETRIES: u32 = 10;
pub const DEFAULT_LOCK_RETRY_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct DrftConfig {
    pub working_dir: PathBuf,
    pub state_path: String,
    pub lock_max_retries: u32,
    pub lock_retry_interval_ms: u64,
    pub verbose: bool,
}

impl DrftConfig {
    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }
}

impl Default for DrftConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            state_path: ".drft/state.json".to_string(),
            lock_max_retries: DEFAULT_LOCK_MAX_RETRIES,
            lock_retry_interval_ms: DEFAULT_LOCK_RETRY_INTERVAL_MS,
            verbose: false,
        }
    }
}
