//! Runtime configuration.
//!
//! Mailbox capacities and scheduler timing, with serde support so hosts can
//! load settings from a TOML file. Everything has a usable default; most
//! deployments never touch this.

use crate::error::{BlockError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Channel capacity for the inbound mailbox (data + rule traffic).
const INBOUND_CAPACITY: usize = 256;
/// Channel capacity for the outbound mailbox.
const OUTBOUND_CAPACITY: usize = 256;
/// Channel capacity for the error mailbox.
const ERROR_CAPACITY: usize = 64;
/// Channel capacity for the generator bridge.
const BRIDGE_CAPACITY: usize = 64;
/// Fallback poll interval when nothing is queued, in milliseconds. Push
/// events re-check the queue immediately; this only bounds the idle sleep.
const IDLE_RECHECK_MS: u64 = 500;

/// Tunables for one block's execution loop and mailboxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Inbound mailbox capacity. Senders block when it is full.
    pub inbound_capacity: usize,
    /// Outbound mailbox capacity. The loop drops (and counts) messages when
    /// it is full rather than stalling.
    pub outbound_capacity: usize,
    /// Error mailbox capacity; same drop-on-full policy as outbound.
    pub error_capacity: usize,
    /// Generator bridge capacity.
    pub bridge_capacity: usize,
    /// Idle recheck interval in milliseconds.
    pub idle_recheck_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: INBOUND_CAPACITY,
            outbound_capacity: OUTBOUND_CAPACITY,
            error_capacity: ERROR_CAPACITY,
            bridge_capacity: BRIDGE_CAPACITY,
            idle_recheck_ms: IDLE_RECHECK_MS,
        }
    }
}

impl RuntimeConfig {
    /// Idle recheck interval as a `Duration`.
    pub fn idle_recheck(&self) -> Duration {
        Duration::from_millis(self.idle_recheck_ms)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| BlockError::Config(e.to_string()))
    }
}
