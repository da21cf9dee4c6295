//! Pool configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Order in which queued jobs are serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// Most recently pushed job runs first.
    #[default]
    Lifo,
    /// Jobs run in submission order.
    Fifo,
}

/// How execution contexts are backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBackend {
    /// Stackful coroutine with its own stack.
    #[default]
    Fiber,
    /// Trampoline that runs the entry loop on the host stack.
    Inline,
}

/// Configuration for the fiber pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of execution contexts created by `init`. Default: 4.
    pub context_count: usize,
    /// Stack size for each fiber context in bytes. Default: 256KB.
    pub stack_size: usize,
    /// Dispatch order of the job queue. Default: LIFO.
    pub order: QueueOrder,
    /// Context implementation. Default: fiber.
    pub backend: ContextBackend,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            context_count: 4,
            stack_size: 256 * 1024,
            order: QueueOrder::Lifo,
            backend: ContextBackend::Fiber,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl PoolConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Returns the config with a different dispatch order.
    pub fn with_order(mut self, order: QueueOrder) -> Self {
        self.order = order;
        self
    }

    /// Returns the config with a different context backend.
    pub fn with_backend(mut self, backend: ContextBackend) -> Self {
        self.backend = backend;
        self
    }
}
