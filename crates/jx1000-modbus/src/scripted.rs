//! Byte-level fake port for unit tests.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

use crate::crc::append_crc;

/// Records every write and replays queued responses one per request.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    pub written: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    current: VecDeque<u8>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply.
    pub fn reply_raw(mut self, bytes: Vec<u8>) -> Self {
        self.replies.push_back(bytes);
        self
    }

    /// Queue a reply and append a valid checksum to it.
    pub fn reply(self, mut body: Vec<u8>) -> Self {
        append_crc(&mut body);
        self.reply_raw(body)
    }

    /// Queue a holding-register read response.
    pub fn registers(self, slave: u8, values: &[u16]) -> Self {
        let mut body = vec![slave, 0x03, (values.len() * 2) as u8];
        for value in values {
            body.extend_from_slice(&value.to_be_bytes());
        }
        self.reply(body)
    }

    /// Queue the echo of a single-register write.
    pub fn echo_write(self, slave: u8, addr: u16, value: u16) -> Self {
        let mut body = vec![slave, 0x06];
        body.extend_from_slice(&addr.to_be_bytes());
        body.extend_from_slice(&value.to_be_bytes());
        self.reply(body)
    }

    /// Queue nothing for the next request; the client times out.
    pub fn silence(self) -> Self {
        self.reply_raw(Vec::new())
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.current.is_empty() {
            return Err(io::Error::from(ErrorKind::TimedOut));
        }
        let n = buf.len().min(self.current.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.current.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.push(buf.to_vec());
        self.current = self.replies.pop_front().unwrap_or_default().into();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
