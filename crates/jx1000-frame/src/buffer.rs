use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::codec::{decode_frame, Frame, HEADER, MIN_FRAME_LEN, OVERHEAD};
use crate::error::FrameError;

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Default cap on buffered bytes before the oldest ones are discarded.
pub const DEFAULT_MAX_BUFFERED: usize = 4 * 1024;

/// Accumulates raw bytes and yields validated frames.
///
/// Tolerates noise and interleaved text on the wire: bytes that do not start
/// a frame header are dropped one at a time until the stream resynchronizes.
/// A frame whose checksum fails is dropped whole, trusting its length field.
///
/// The size cap only ever trims bytes that cannot belong to a complete frame:
/// when a push goes over the cap, complete frames are parsed out first and
/// held until [`next_frame`](Self::next_frame) returns them.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: BytesMut,
    ready: VecDeque<Frame>,
    max_buffered: usize,
    discarded_bytes: u64,
    checksum_failures: u64,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveBuffer {
    /// Create a buffer with the default size cap.
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED)
    }

    /// Create a buffer that holds at most `max_buffered` bytes.
    ///
    /// The cap is raised to at least one maximum-size frame.
    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            ready: VecDeque::new(),
            max_buffered: max_buffered.max(OVERHEAD + u8::MAX as usize),
            discarded_bytes: 0,
            checksum_failures: 0,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);

        if self.buf.len() > self.max_buffered {
            while let Some(frame) = self.parse_frame() {
                self.ready.push_back(frame);
            }
        }
        if self.buf.len() > self.max_buffered {
            let excess = self.buf.len() - self.max_buffered;
            warn!(excess, "receive buffer over capacity, discarding oldest bytes");
            self.buf.advance(excess);
            self.discarded_bytes += excess as u64;
        }
    }

    /// Extract the next valid frame, if a complete one is buffered.
    ///
    /// Returns `None` when more bytes are needed. Call again after the next
    /// [`push`](Self::push); no state is kept besides the buffered bytes.
    pub fn next_frame(&mut self) -> Option<Frame> {
        match self.ready.pop_front() {
            Some(frame) => Some(frame),
            None => self.parse_frame(),
        }
    }

    fn parse_frame(&mut self) -> Option<Frame> {
        while self.buf.len() >= MIN_FRAME_LEN {
            if self.buf[0..2] != HEADER {
                self.buf.advance(1);
                self.discarded_bytes += 1;
                continue;
            }

            let total = self.buf[2] as usize + OVERHEAD;
            if self.buf.len() < total {
                return None;
            }

            let candidate = self.buf.split_to(total);
            match decode_frame(&candidate) {
                Ok(frame) => return Some(frame),
                Err(FrameError::ChecksumMismatch { expected, actual }) => {
                    self.checksum_failures += 1;
                    debug!(
                        expected,
                        actual, total, "dropping frame with checksum mismatch"
                    );
                }
                Err(err) => {
                    self.discarded_bytes += total as u64;
                    debug!(%err, "dropping malformed frame");
                }
            }
        }
        None
    }

    /// Drain every complete frame currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { buffer: self }
    }

    /// Number of bytes not yet parsed into a frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Bytes dropped while resynchronizing or because of the size cap.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Frames dropped because their checksum did not match.
    pub fn checksum_failures(&self) -> u64 {
        self.checksum_failures
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.ready.clear();
    }
}

/// Iterator returned by [`ReceiveBuffer::frames`].
pub struct Frames<'a> {
    buffer: &'a mut ReceiveBuffer,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.buffer.next_frame()
    }
}
