use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame};
use crate::command::Command;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 512;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.command(), frame.payload.as_ref())
    }

    /// Encode and send a payload under a command code.
    ///
    /// The whole frame is written before returning; a short write never
    /// leaves half a frame queued behind the next one.
    pub fn send(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(command, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match retrying(|| self.inner.write(&self.buf[offset..]))? {
                0 => return Err(FrameError::ConnectionClosed),
                n => offset += n,
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        retrying(|| self.inner.flush())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Repeat `op` while the port reports a transient condition.
///
/// Serial drivers surface a full output queue as `WouldBlock`.
fn retrying<R>(mut op: impl FnMut() -> std::io::Result<R>) -> Result<R> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::buffer::ReceiveBuffer;
    use crate::codec::decode_frame;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(Command::Log, b"cmd_EnableExec()\r\n").unwrap();

        let wire = written(writer);
        let frame = decode_frame(&wire).unwrap();
        assert_eq!(frame.command(), Command::Log);
        assert_eq!(frame.payload.as_ref(), b"cmd_EnableExec()\r\n");
    }

    #[test]
    fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(Command::Info, &[0, 0]).unwrap();
        writer.send(Command::DevRead, &[1; 8]).unwrap();
        writer.send(Command::RuleDown, &[2, 0, 0, 1, 0]).unwrap();

        let mut rx = ReceiveBuffer::new();
        rx.push(&written(writer));
        let commands: Vec<Command> = rx.frames().map(|f| f.command()).collect();
        assert_eq!(
            commands,
            vec![Command::Info, Command::DevRead, Command::RuleDown]
        );
    }

    #[test]
    fn payload_too_large_rejected() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let err = writer.send(Command::Log, &[0u8; 300]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn write_frame_method() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let frame = Frame::new(Command::Other(0x33), "abc");
        writer.write_frame(&frame).unwrap();

        let decoded = decode_frame(&written(writer)).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn flush_reaches_the_port() {
        let mut writer = FrameWriter::new(ScriptedWriter::default());
        writer.send(Command::Info, &[0, 0]).unwrap();

        let port = writer.into_inner();
        assert_eq!(port.flushes, 1);
        assert_eq!(port.data.len(), 7);
    }

    #[test]
    fn transient_errors_are_retried() {
        for kind in [ErrorKind::Interrupted, ErrorKind::WouldBlock] {
            let mut writer = FrameWriter::new(ScriptedWriter::failing_once(kind));
            writer.send(Command::Result, b"retry").unwrap();

            let port = writer.into_inner();
            assert_eq!(port.data.len(), 10, "{kind:?}");
            assert_eq!(port.flushes, 1, "{kind:?}");
        }
    }

    #[test]
    fn short_writes_complete_the_frame() {
        let mut writer = FrameWriter::new(OneByteWriter::default());
        writer.send(Command::DevWrite, &[1, 2, 3, 4]).unwrap();
        let wire = writer.into_inner().data;
        assert_eq!(decode_frame(&wire).unwrap().payload.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(Command::Info, &[0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn other_io_errors_surface() {
        let mut writer = FrameWriter::new(BrokenWriter);
        let err = writer.send(Command::Info, &[0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    /// Records writes and flushes; optionally fails the first write and the
    /// first flush with `fail_once`.
    #[derive(Default)]
    struct ScriptedWriter {
        fail_once: Option<ErrorKind>,
        write_failed: bool,
        flush_failed: bool,
        flushes: usize,
        data: Vec<u8>,
    }

    impl ScriptedWriter {
        fn failing_once(kind: ErrorKind) -> Self {
            Self {
                fail_once: Some(kind),
                ..Self::default()
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let (Some(kind), false) = (self.fail_once, self.write_failed) {
                self.write_failed = true;
                return Err(std::io::Error::from(kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if let (Some(kind), false) = (self.fail_once, self.flush_failed) {
                self.flush_failed = true;
                return Err(std::io::Error::from(kind));
            }
            self.flushes += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct OneByteWriter {
        data: Vec<u8>,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
