use std::time::Duration;

use jx1000_frame::Command;

/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The port is closed or the write to it failed.
    #[error("port unavailable: {0}")]
    PortUnavailable(String),

    /// No response arrived before the deadline.
    #[error("{command} request timed out after {after:?}")]
    Timeout { command: Command, after: Duration },

    /// The rules buffer cannot be uploaded.
    #[error("invalid rules buffer: {0}")]
    InvalidBuffer(String),

    /// The device answered a rule chunk with a negative acknowledgment.
    #[error("device rejected rule chunk at offset {offset}")]
    ChunkRejected { offset: usize },

    /// Another rule upload is still running on this session.
    #[error("a rule upload is already in progress")]
    UploadInProgress,

    /// The wait was abandoned because the session closed.
    #[error("request cancelled: session closed")]
    Cancelled,

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] jx1000_frame::FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] jx1000_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
