//! Document configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_UNDO_STACK, DEFAULT_THROTTLE_MS};

/// Tunables of a [`Document`](super::Document).
///
/// Missing fields take their defaults when deserializing:
///
/// ```
/// use livetree::DocumentConfig;
///
/// let config: DocumentConfig = serde_json::from_str(r#"{"throttle_ms": 16}"#).unwrap();
/// assert_eq!(config.throttle_ms, 16);
/// assert_eq!(config.max_undo_stack, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Minimum delay between two outbound flushes, in milliseconds.
    pub throttle_ms: u64,
    /// Undo entries kept before the oldest is evicted.
    pub max_undo_stack: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            throttle_ms: DEFAULT_THROTTLE_MS,
            max_undo_stack: DEFAULT_MAX_UNDO_STACK,
        }
    }
}

impl DocumentConfig {
    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    pub fn with_max_undo_stack(mut self, max_undo_stack: usize) -> Self {
        self.max_undo_stack = max_undo_stack;
        self
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}
