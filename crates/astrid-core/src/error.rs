//! Error types for astrid-core.

use thiserror::Error;

/// Error type for astrid-core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Buffer has no frames")]
    EmptyBuffer,

    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),

    #[error("Scheduler inbound queue is full ({capacity} pending events)")]
    SchedulerFull { capacity: usize },
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
