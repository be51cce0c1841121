//! Runtime configuration.
//!
//! Everything has a default, so a TOML file only needs the values it changes:
//!
//! ```toml
//! [processor]
//! workers = 8
//! max_attempts = 3
//!
//! [queue]
//! visibility_timeout_ms = 10000
//! ```

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub processor: ProcessorConfig,
    pub queue: QueueConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processor.workers == 0 {
            return Err(LedgerError::validation("processor.workers must be at least 1"));
        }
        if self.processor.max_attempts == 0 {
            return Err(LedgerError::validation(
                "processor.max_attempts must be at least 1",
            ));
        }
        let queue = &self.queue;
        if queue.visibility_timeout_ms == 0
            || queue.poll_interval_ms == 0
            || queue.receive_timeout_ms == 0
        {
            return Err(LedgerError::validation(
                "queue timeouts must be greater than zero",
            ));
        }
        if self.processor.store_timeout_ms == 0 {
            return Err(LedgerError::validation(
                "processor.store_timeout_ms must be greater than zero",
            ));
        }
        // A claim must outlive any single store call made while holding it.
        if self.processor.store_timeout_ms >= queue.visibility_timeout_ms {
            return Err(LedgerError::validation(format!(
                "processor.store_timeout_ms ({}) must be below queue.visibility_timeout_ms ({})",
                self.processor.store_timeout_ms, queue.visibility_timeout_ms
            )));
        }
        Ok(())
    }
}

/// Transaction processor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Deliveries allowed for a message failing with a transient error before it is
    /// dead-lettered.
    pub max_attempts: u32,
    /// Reload-and-retry rounds after a version conflict within one delivery.
    pub max_conflict_retries: u32,
    pub store_timeout_ms: u64,
    /// Number of concurrent consumers.
    pub workers: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_conflict_retries: 16,
            store_timeout_ms: 5_000,
            workers: 4,
        }
    }
}

impl ProcessorConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// How long a delivered message stays claimed without an ack.
    pub visibility_timeout_ms: u64,
    /// Upper bound on how long an idle receive sleeps before re-checking.
    pub poll_interval_ms: u64,
    /// How long a consumer waits for a message before looping again; also the
    /// timeout applied to publish and settle calls.
    pub receive_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            poll_interval_ms: 50,
            receive_timeout_ms: 5_000,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}
