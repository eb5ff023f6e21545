use std::fmt;
use std::io;

use jx1000_device::DeviceError;
use jx1000_frame::FrameError;
use jx1000_modbus::ModbusError;
use jx1000_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Transport(err) => transport_error(context, err),
        DeviceError::Frame(err) => frame_error(context, err),
        DeviceError::PortUnavailable(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        DeviceError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        DeviceError::InvalidBuffer(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        DeviceError::ChunkRejected { .. }
        | DeviceError::UploadInProgress
        | DeviceError::Cancelled => CliError::new(FAILURE, format!("{context}: {err}")),
        DeviceError::Spawn { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn modbus_error(context: &str, err: ModbusError) -> CliError {
    match err {
        ModbusError::Transport(err) => transport_error(context, err),
        ModbusError::Io(source) => io_error(context, source),
        ModbusError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ModbusError::Crc { .. } | ModbusError::UnexpectedResponse(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ModbusError::Exception { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        ModbusError::InvalidRequest(_) | ModbusError::InvalidMapping(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
    }
}
