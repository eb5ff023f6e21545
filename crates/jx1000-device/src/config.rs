use std::time::Duration;

use jx1000_frame::{DEFAULT_MAX_BUFFERED, MAX_PAYLOAD};
use jx1000_transport::SerialConfig;

/// Default wait for a DevRead response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(300);

/// Default wait for a DevWrite acknowledgment.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(300);

/// Default wait for each rule chunk acknowledgment.
pub const DEFAULT_CHUNK_ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// How long an upload waits for the info probe answer before sending chunks.
pub const DEFAULT_INFO_PROBE_WAIT: Duration = Duration::from_millis(50);

/// Rule bytes carried per chunk frame.
pub const DEFAULT_CHUNK_SIZE: usize = 156;

/// Largest chunk that still fits a frame next to the 4-byte chunk header.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD - 4;

/// Bytes requested from the port per receive-loop read.
pub const DEFAULT_READ_CHUNK: usize = 256;

/// Behavior and timing of a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial line settings. `serial.read_timeout` is also the receive-loop
    /// poll interval and bounds how long `close` waits for the loop to stop.
    pub serial: SerialConfig,
    /// Wait for a memory read response.
    pub read_timeout: Duration,
    /// Wait for a memory write acknowledgment.
    pub write_timeout: Duration,
    /// Wait for an info response in `query_info`.
    pub info_timeout: Duration,
    /// Wait for each rule chunk acknowledgment.
    pub chunk_ack_timeout: Duration,
    /// Pause for the info probe answer at the start of an upload.
    pub info_probe_wait: Duration,
    /// Rule bytes per chunk; clamped to `1..=MAX_CHUNK_SIZE`.
    pub chunk_size: usize,
    /// Bytes requested per port read.
    pub read_chunk: usize,
    /// Receive buffer cap.
    pub max_buffered: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            info_timeout: DEFAULT_READ_TIMEOUT,
            chunk_ack_timeout: DEFAULT_CHUNK_ACK_TIMEOUT,
            info_probe_wait: DEFAULT_INFO_PROBE_WAIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_chunk: DEFAULT_READ_CHUNK,
            max_buffered: DEFAULT_MAX_BUFFERED,
        }
    }
}

impl SessionConfig {
    /// Chunk size actually used on the wire.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }
}
