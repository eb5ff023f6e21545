use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::loopback::LoopbackPort;

const UNBOUNDED_SERIAL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// A connected byte channel to the device. Implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Reads honor the configured read timeout and fail with
/// `ErrorKind::TimedOut` when no byte arrives in time.
pub struct SerialStream {
    inner: SerialStreamInner,
}

enum SerialStreamInner {
    Serial {
        name: String,
        port: Box<dyn serialport::SerialPort>,
    },
    Loopback(LoopbackPort),
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Serial { port, .. } => port.read(buf),
            SerialStreamInner::Loopback(port) => port.read(buf),
        }
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Serial { port, .. } => port.write(buf),
            SerialStreamInner::Loopback(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            SerialStreamInner::Serial { port, .. } => port.flush(),
            SerialStreamInner::Loopback(port) => port.flush(),
        }
    }
}

impl SerialStream {
    /// Wrap an opened `serialport` handle.
    pub(crate) fn from_serial(name: String, port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            inner: SerialStreamInner::Serial { name, port },
        }
    }

    /// Wrap one end of an in-memory loopback pair.
    pub fn from_loopback(port: LoopbackPort) -> Self {
        Self {
            inner: SerialStreamInner::Loopback(port),
        }
    }

    /// Create a connected in-memory pair. Bytes written to one end are read
    /// from the other.
    pub fn pair() -> (Self, Self) {
        let (left, right) = LoopbackPort::pair();
        (Self::from_loopback(left), Self::from_loopback(right))
    }

    /// Human-readable name of the underlying channel.
    pub fn name(&self) -> &str {
        match &self.inner {
            SerialStreamInner::Serial { name, .. } => name,
            SerialStreamInner::Loopback(_) => "loopback",
        }
    }

    /// Set the read timeout on the underlying stream.
    ///
    /// `None` blocks indefinitely on loopback streams; serial ports do not
    /// support unbounded reads, so a very long timeout is applied instead.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            SerialStreamInner::Serial { name, port } => port
                .set_timeout(timeout.unwrap_or(UNBOUNDED_SERIAL_TIMEOUT))
                .map_err(|source| TransportError::Configure {
                    port: name.clone(),
                    source,
                }),
            SerialStreamInner::Loopback(port) => {
                port.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Try to clone this stream. Both handles address the same channel.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            SerialStreamInner::Serial { name, port } => {
                let cloned = port.try_clone().map_err(|source| TransportError::Configure {
                    port: name.clone(),
                    source,
                })?;
                Ok(Self::from_serial(name.clone(), cloned))
            }
            SerialStreamInner::Loopback(port) => Ok(Self::from_loopback(port.clone())),
        }
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            SerialStreamInner::Serial { name, .. } => f
                .debug_struct("SerialStream")
                .field("type", &"serial")
                .field("port", name)
                .finish(),
            SerialStreamInner::Loopback(_) => f
                .debug_struct("SerialStream")
                .field("type", &"loopback")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn pair_carries_bytes_both_ways() {
        let (mut host, mut device) = SerialStream::pair();
        device
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        host.set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        host.write_all(b"ping").unwrap();
        let mut buf = [0u8; 8];
        let n = device.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        device.write_all(b"pong").unwrap();
        let n = host.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn clone_shares_channel() {
        let (host, mut device) = SerialStream::pair();
        let mut writer = host.try_clone().unwrap();
        device
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        writer.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn read_times_out_without_data() {
        let (mut host, _device) = SerialStream::pair();
        host.set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 4];
        let err = host.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn loopback_name_and_debug() {
        let (host, _device) = SerialStream::pair();
        assert_eq!(host.name(), "loopback");
        assert!(format!("{host:?}").contains("loopback"));
    }
}
