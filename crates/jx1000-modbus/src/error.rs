/// Errors that can occur talking to the I/O module.
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    /// The port could not be opened or configured.
    #[error("transport error: {0}")]
    Transport(#[from] jx1000_transport::TransportError),

    /// Reading or writing the port failed.
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// The module did not answer in time.
    #[error("no response from device")]
    Timeout,

    /// The response checksum does not match its contents.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Crc { expected: u16, actual: u16 },

    /// The module answered with an exception code.
    #[error("modbus exception {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },

    /// The response does not belong to the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The request cannot be encoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The mapped-register range is out of bounds.
    #[error("{0}")]
    InvalidMapping(String),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::UnexpectedEof => ModbusError::Timeout,
            _ => ModbusError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModbusError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn timeouts_map_to_timeout() {
        for kind in [ErrorKind::TimedOut, ErrorKind::WouldBlock, ErrorKind::UnexpectedEof] {
            let err: ModbusError = Error::from(kind).into();
            assert!(matches!(err, ModbusError::Timeout), "{kind:?}");
        }
        let err: ModbusError = Error::from(ErrorKind::BrokenPipe).into();
        assert!(matches!(err, ModbusError::Io(_)));
    }

    #[test]
    fn mapping_error_displays_bare_message() {
        let err = ModbusError::InvalidMapping("Mapped read requires 1000-1499 input".into());
        assert_eq!(err.to_string(), "Mapped read requires 1000-1499 input");
    }
}
