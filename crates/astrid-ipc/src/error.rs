//! Error types for the IPC layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Timed out after {waited_ms}ms acquiring lock '{name}' (held by pid {holder})")]
    LockTimeout {
        name: String,
        holder: u32,
        waited_ms: u64,
    },

    #[error("Released lock '{name}' that was not held")]
    LockNotHeld { name: String },

    #[error("Wire format error: {0}")]
    WireFormat(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Delivery to '{destination}' failed: {reason}")]
    Delivery { destination: String, reason: String },

    #[error("No route to '{destination}': {reason}")]
    Unroutable { destination: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;
