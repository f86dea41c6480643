//! Execution queue configuration

use std::env;

use crate::error::{OffloadError, OffloadResult};

const ENV_WORKER_THREADS: &str = "OFFLOADFORGE_WORKER_THREADS";
const ENV_IN_ORDER: &str = "OFFLOADFORGE_IN_ORDER";
const ENV_PROFILING: &str = "OFFLOADFORGE_PROFILING";

/// Configuration for an execution queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Worker lanes of the emulated device; `None` sizes from the device's
    /// compute units
    pub worker_threads: Option<usize>,
    /// Order every task after the previously submitted one
    pub in_order: bool,
    /// Record submit/start/end timestamps on events
    pub enable_profiling: bool,
    pub thread_name_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            worker_threads: None,
            in_order: false,
            enable_profiling: false,
            thread_name_prefix: "offloadforge-lane".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_in_order(mut self, in_order: bool) -> Self {
        self.in_order = in_order;
        self
    }

    pub fn with_profiling(mut self, enable: bool) -> Self {
        self.enable_profiling = enable;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Defaults overridden by `OFFLOADFORGE_*` environment variables
    pub fn from_env() -> OffloadResult<Self> {
        let mut config = Self::default();

        if let Ok(value) = env::var(ENV_WORKER_THREADS) {
            let threads = value.trim().parse::<usize>().map_err(|_| {
                OffloadError::InvalidConfiguration(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_WORKER_THREADS, value
                ))
            })?;
            config.worker_threads = Some(threads);
        }
        if let Ok(value) = env::var(ENV_IN_ORDER) {
            config.in_order = parse_flag(ENV_IN_ORDER, &value)?;
        }
        if let Ok(value) = env::var(ENV_PROFILING) {
            config.enable_profiling = parse_flag(ENV_PROFILING, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OffloadResult<()> {
        if self.worker_threads == Some(0) {
            return Err(OffloadError::InvalidConfiguration(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(OffloadError::InvalidConfiguration(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> OffloadResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(OffloadError::InvalidConfiguration(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}
