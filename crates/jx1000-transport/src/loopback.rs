//! In-memory loopback channel.
//!
//! Two [`LoopbackPort`] ends behave like the two sides of a null-modem cable.
//! Used by the device simulator and by tests that need a byte channel without
//! hardware.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One end of an in-memory byte channel.
///
/// Clones address the same end and share its read timeout.
#[derive(Clone)]
pub struct LoopbackPort {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    read_timeout: Arc<Mutex<Option<Duration>>>,
}

impl LoopbackPort {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        let left = Self {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            read_timeout: Arc::new(Mutex::new(None)),
        };
        let right = Self {
            rx: a_to_b,
            tx: b_to_a,
            read_timeout: Arc::new(Mutex::new(None)),
        };
        (left, right)
    }

    /// Set the read timeout. `None` blocks until data arrives.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    /// Number of bytes waiting to be read on this end.
    pub fn available(&self) -> usize {
        self.rx.lock().len()
    }

    fn timeout(&self) -> Option<Duration> {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for LoopbackPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut bytes = self.rx.lock();
        if bytes.is_empty() {
            bytes = match self.timeout() {
                Some(timeout) => {
                    let (guard, _) = self
                        .rx
                        .ready
                        .wait_timeout_while(bytes, timeout, |b| b.is_empty())
                        .unwrap_or_else(PoisonError::into_inner);
                    guard
                }
                None => self
                    .rx
                    .ready
                    .wait_while(bytes, |b| b.is_empty())
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }

        if bytes.is_empty() {
            return Err(io::Error::from(ErrorKind::TimedOut));
        }

        let n = bytes.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.lock().extend(buf.iter().copied());
        self.tx.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
