use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::SerialStream;

/// Default line rate of the instrument.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read timeout. Short so a background reader can observe shutdown.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Parity setting for serial port configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    fn to_serialport(self) -> serialport::Parity {
        match self {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl std::str::FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(format!("unknown parity '{other}'")),
        }
    }
}

/// Line settings used when opening a serial port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate. Default: 115200.
    pub baud_rate: u32,
    /// Data bits (5-8). Default: 8.
    pub data_bits: u8,
    /// Parity. Default: none.
    pub parity: Parity,
    /// Stop bits (1 or 2). Default: 1.
    pub stop_bits: u8,
    /// Read timeout applied to the port.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Line settings for the companion Modbus I/O module (9600 8N1, 1 s).
    pub fn modbus() -> Self {
        Self {
            baud_rate: 9_600,
            read_timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }

    fn data_bits(&self) -> serialport::DataBits {
        match self.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> serialport::StopBits {
        match self.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        }
    }
}

/// Open a serial port with the given line settings.
pub fn open(port: &str, config: &SerialConfig) -> Result<SerialStream> {
    debug!(port, baud = config.baud_rate, "opening serial port");
    let handle = serialport::new(port, config.baud_rate)
        .data_bits(config.data_bits())
        .parity(config.parity.to_serialport())
        .stop_bits(config.stop_bits())
        .timeout(config.read_timeout)
        .open()
        .map_err(|source| TransportError::Open {
            port: port.to_string(),
            source,
        })?;

    info!(port, baud = config.baud_rate, "serial port opened");
    Ok(SerialStream::from_serial(port.to_string(), handle))
}
