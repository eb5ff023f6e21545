//! Rule-file upload.
//!
//! The file is sent as a series of RuleDown frames, each carrying a 4-byte
//! header `(kind: u8, offset: u16 LE, len: u8)` and up to one chunk of data.
//! The device acknowledges every data chunk; a final `kind = 2` frame tells it
//! the upload is complete and is not acknowledged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use jx1000_frame::Command;
use serde::Serialize;
use tracing::{info, warn};

use crate::channel::CommandChannel;
use crate::error::{DeviceError, Result};

/// Smallest accepted rules buffer.
pub const MIN_RULES_LEN: usize = 10;

/// Largest rules buffer addressable by the 16-bit chunk offset.
pub const MAX_RULES_LEN: usize = 1 << 16;

/// Chunk header kind for data chunks.
pub const KIND_DATA: u8 = 1;

/// Chunk header kind for the closing frame.
pub const KIND_FINALIZE: u8 = 2;

/// Upload lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Idle,
    Uploading,
    Finalizing,
    Done,
    Failed,
}

/// Check that `rules` can be uploaded.
pub fn validate_rules(rules: &[u8]) -> Result<()> {
    if rules.is_empty() {
        return Err(DeviceError::InvalidBuffer("empty".to_string()));
    }
    if rules.len() < MIN_RULES_LEN {
        return Err(DeviceError::InvalidBuffer(format!(
            "{} bytes, need at least {MIN_RULES_LEN}",
            rules.len()
        )));
    }
    if rules.len() > MAX_RULES_LEN {
        return Err(DeviceError::InvalidBuffer(format!(
            "{} bytes, at most {MAX_RULES_LEN} fit the chunk offset",
            rules.len()
        )));
    }
    Ok(())
}

/// Encode a data chunk payload.
pub fn chunk_payload(offset: u16, chunk: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + chunk.len());
    buf.put_u8(KIND_DATA);
    buf.put_u16_le(offset);
    buf.put_u8(chunk.len() as u8);
    buf.put_slice(chunk);
    buf.freeze()
}

/// Payload of the closing frame.
pub fn finalize_payload() -> [u8; 5] {
    [KIND_FINALIZE, 0x00, 0x00, 0x01, 0x00]
}

/// Progress through a rules buffer.
#[derive(Debug, Clone)]
pub struct TransferState {
    buffer: Bytes,
    offset: usize,
    chunk_size: usize,
}

impl TransferState {
    /// Validate `buffer` and start at offset zero.
    pub fn new(buffer: Bytes, chunk_size: usize) -> Result<Self> {
        validate_rules(&buffer)?;
        Ok(Self {
            buffer,
            offset: 0,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn total_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_complete(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    /// Number of data chunks the whole buffer needs.
    pub fn chunk_count(&self) -> usize {
        self.buffer.len().div_ceil(self.chunk_size)
    }

    /// The chunk at the current offset, if any remain.
    pub fn current_chunk(&self) -> Option<&[u8]> {
        if self.is_complete() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.buffer.len());
        Some(&self.buffer[self.offset..end])
    }

    /// Payload for the current chunk.
    ///
    /// A 65536-byte buffer ends exactly at the offset limit, so the largest
    /// offset ever sent is below 65536.
    pub fn current_payload(&self) -> Option<Bytes> {
        let chunk = self.current_chunk()?;
        Some(chunk_payload(self.offset as u16, chunk))
    }

    /// Move past the current chunk.
    pub fn advance(&mut self) {
        self.offset = (self.offset + self.chunk_size).min(self.buffer.len());
    }

    /// Share of the buffer already sent, rounded down.
    pub fn percent(&self) -> usize {
        self.offset * 100 / self.buffer.len()
    }
}

/// Timing for one upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadTiming {
    pub chunk_ack_timeout: Duration,
    pub info_probe_wait: Duration,
}

/// Handle to a running upload.
#[derive(Debug)]
pub struct UploadHandle {
    phase: Arc<Mutex<TransferPhase>>,
    worker: JoinHandle<Result<()>>,
}

impl UploadHandle {
    /// Current phase.
    pub fn phase(&self) -> TransferPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the upload to end and return its final phase.
    pub fn join(self) -> TransferPhase {
        match self.worker.join() {
            Ok(_) => *self.phase.lock().unwrap_or_else(PoisonError::into_inner),
            Err(_) => TransferPhase::Failed,
        }
    }

    /// Wait for the upload to end and return the error that stopped it.
    ///
    /// A worker that panicked reports [`DeviceError::Cancelled`].
    pub fn wait(self) -> Result<()> {
        self.worker.join().unwrap_or(Err(DeviceError::Cancelled))
    }
}

/// Clears the session's busy flag when the worker exits, however it exits.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Start an upload on its own thread.
///
/// `busy` must already be set by the caller; it is cleared when the worker
/// ends.
pub(crate) fn spawn(
    channel: Arc<CommandChannel>,
    state: TransferState,
    timing: UploadTiming,
    busy: Arc<AtomicBool>,
) -> Result<UploadHandle> {
    let guard = BusyGuard(busy);
    let phase = Arc::new(Mutex::new(TransferPhase::Uploading));
    let worker_phase = Arc::clone(&phase);

    let worker = thread::Builder::new()
        .name("jx1000-upload".to_string())
        .spawn(move || {
            let _guard = guard;
            run(&channel, state, timing, &worker_phase)
        })
        .map_err(|source| DeviceError::Spawn {
            name: "upload",
            source,
        })?;

    Ok(UploadHandle { phase, worker })
}

fn set_phase(phase: &Mutex<TransferPhase>, next: TransferPhase) {
    *phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

fn fail(phase: &Mutex<TransferPhase>, err: DeviceError) -> Result<()> {
    set_phase(phase, TransferPhase::Failed);
    Err(err)
}

fn run(
    channel: &CommandChannel,
    mut state: TransferState,
    timing: UploadTiming,
    phase: &Mutex<TransferPhase>,
) -> Result<()> {
    let events = channel.events();
    info!(
        bytes = state.total_len(),
        chunks = state.chunk_count(),
        "rule upload started"
    );

    if let Err(err) = channel.query_info(timing.info_probe_wait) {
        info!(%err, "no info answer before upload, continuing");
    }

    while let Some(payload) = state.current_payload() {
        let ack = channel.send_and_wait(
            &channel.pending().rule_ack,
            Command::RuleDown,
            &payload,
            timing.chunk_ack_timeout,
        );

        match ack {
            Ok(true) => {
                state.advance();
                events.publish(Command::RuleDown, format!("{}% - OK", state.percent()));
            }
            Ok(false) => {
                warn!(offset = state.offset(), "rule chunk rejected");
                events.publish(Command::RuleDown, "chunk-failed");
                return fail(
                    phase,
                    DeviceError::ChunkRejected {
                        offset: state.offset(),
                    },
                );
            }
            Err(DeviceError::Timeout { after, .. }) => {
                warn!(offset = state.offset(), ?after, "no ack for rule chunk");
                state.advance();
                events.publish(
                    Command::RuleDown,
                    format!("{}% - Unknown", state.percent()),
                );
            }
            Err(DeviceError::Cancelled) => {
                warn!(offset = state.offset(), "rule upload cancelled");
                events.publish(Command::RuleDown, "cancelled");
                return fail(phase, DeviceError::Cancelled);
            }
            Err(err) => {
                warn!(offset = state.offset(), %err, "rule chunk send failed");
                events.publish(Command::RuleDown, "error-send");
                return fail(phase, err);
            }
        }
    }

    set_phase(phase, TransferPhase::Finalizing);
    if let Err(err) = channel.send(Command::RuleDown, &finalize_payload()) {
        warn!(%err, "rule finalize send failed");
        events.publish(Command::RuleDown, "error-send");
        return fail(phase, err);
    }

    info!(bytes = state.total_len(), "rule upload done");
    events.publish(Command::RuleDown, "Done");
    set_phase(phase, TransferPhase::Done);
    Ok(())
}
