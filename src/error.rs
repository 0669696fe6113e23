//! Error handling for the block runtime.
//!
//! One error enum covers every failure a block or its execution loop can
//! produce. Per-message and per-rule-change failures are reported on the
//! block's error mailbox (wrapped in [`BlockFault`]) and never stop the
//! loop; only setup-time failures are returned to whoever spawned the block.

use thiserror::Error;

/// Main error type for block and runtime operations.
#[derive(Error, Debug)]
pub enum BlockError {
    /// A rule message was malformed or failed validation. The block's
    /// previous rule remains in effect.
    #[error("Rule error: {0}")]
    Rule(String),

    /// A capability method was invoked on a block that does not implement it.
    #[error("Unsupported capability: {0}")]
    Unsupported(&'static str),

    /// A data message could not be processed (missing key, wrong type, ...).
    #[error("Message error: {0}")]
    Message(String),

    /// Failure during `setup()` — prevents the block from starting at all.
    #[error("Setup error: {0}")]
    Setup(String),

    /// Failure while tearing the block down.
    #[error("Tidy-up error: {0}")]
    TidyUp(String),

    /// Errors related to channel communication.
    #[error("Channel error: {0}")]
    Channel(String),

    /// A query did not receive its reply in time.
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    /// Errors related to configuration loading.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors (file sinks, config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for block runtime operations.
pub type Result<T> = std::result::Result<T, BlockError>;

/// An error attributed to a specific block, as delivered on the error mailbox.
#[derive(Debug)]
pub struct BlockFault {
    /// User-assigned name of the block that produced the error.
    pub block: String,
    pub error: BlockError,
}

impl std::fmt::Display for BlockFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.block, self.error)
    }
}
