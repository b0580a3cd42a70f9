#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! [`RuntimeConfig`] groups the tunables of the undo history, hook delivery
//! and the document owner thread. With the `config` feature it can be loaded
//! from TOML or JSON; every field has a default so partial files work.
//!
//! ```toml
//! # talkbook.toml
//! [history]
//! max_depth = 200
//!
//! [hooks]
//! suppress_transaction_end_events = true
//!
//! [executor]
//! thread_name = "talkbook-document"
//! queue_capacity = 64
//! ```

#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct RuntimeConfig {
    pub history: HistoryConfig,
    pub hooks: HookConfig,
    pub executor: ExecutorConfig,
}

/// Undo history limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct HistoryConfig {
    /// Maximum entries on the done stack. The oldest entry is evicted past
    /// this depth.
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_depth: 100 }
    }
}

impl HistoryConfig {
    /// Effectively unbounded history, for tests.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_depth: usize::MAX,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Defaults for hook registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct HookConfig {
    /// Whether hosts registered with the default helper skip
    /// `TransactionEnded` notifications.
    pub suppress_transaction_end_events: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            suppress_transaction_end_events: true,
        }
    }
}

/// Document owner thread settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ExecutorConfig {
    pub thread_name: String,
    /// Bounded job queue length; posting from other threads blocks when full.
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: "talkbook-document".into(),
            queue_capacity: 64,
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// List every out-of-range parameter. Empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.history.max_depth == 0 {
            errors.push("history.max_depth must be > 0".into());
        }
        if self.executor.queue_capacity == 0 {
            errors.push("executor.queue_capacity must be > 0".into());
        }
        if self.executor.thread_name.trim().is_empty() {
            errors.push("executor.thread_name must not be empty".into());
        }
        errors
    }

    /// `self` if valid, otherwise [`ConfigError::Validation`].
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Errors from loading a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "config")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "config")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}
