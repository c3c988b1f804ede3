//! Engine configuration: debounce delays, history depth, gateway retry policy.
//!
//! All values have production defaults; embedding applications can override
//! them from a TOML fragment (or build the struct directly).

use serde::Deserialize;

use crate::error::PrepError;

/// Debounce delay before a hover-triggered diff preview fires.
pub const DEFAULT_HOVER_PREVIEW_DELAY_MS: u64 = 300;

/// Debounce delay before a hover-end restores the original grid.
/// Shorter than the start delay because this is a cancel path.
pub const DEFAULT_CANCEL_PREVIEW_DELAY_MS: u64 = 100;

/// Debounce delay before a parameter-edit update preview fires.
pub const DEFAULT_UPDATE_PREVIEW_DELAY_MS: u64 = 500;

/// Maximum number of undo/redo entries retained.
pub const DEFAULT_MAX_HISTORY_DEPTH: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hover-start debounce, in milliseconds.
    pub hover_preview_delay_ms: u64,
    /// Hover-end debounce, in milliseconds.
    pub cancel_preview_delay_ms: u64,
    /// Parameter-change debounce, in milliseconds.
    pub update_preview_delay_ms: u64,
    /// Undo/redo stack depth; oldest entries are evicted beyond this.
    pub max_history_depth: usize,
    /// Retry policy for the preparation-details fetch.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hover_preview_delay_ms: DEFAULT_HOVER_PREVIEW_DELAY_MS,
            cancel_preview_delay_ms: DEFAULT_CANCEL_PREVIEW_DELAY_MS,
            update_preview_delay_ms: DEFAULT_UPDATE_PREVIEW_DELAY_MS,
            max_history_depth: DEFAULT_MAX_HISTORY_DEPTH,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Parse a config from a TOML fragment. Missing fields fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, PrepError> {
        toml::from_str(raw).map_err(|e| PrepError::Config(e.to_string()))
    }
}
