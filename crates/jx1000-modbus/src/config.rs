use std::time::Duration;

use jx1000_transport::SerialConfig;
use serde::{Deserialize, Serialize};

/// Slave address the module ships with.
pub const DEFAULT_SLAVE: u8 = 1;

/// Pause between raising the test trigger and reading the result.
pub const DEFAULT_TRIGGER_SETTLE: Duration = Duration::from_millis(1);

/// Settings for talking to the I/O module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Line settings. Default: 9600 8N1 with a 1 s read timeout.
    pub serial: SerialConfig,
    /// Slave address.
    pub slave: u8,
    /// Delay between the test trigger write and the result read.
    pub trigger_settle: Duration,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::modbus(),
            slave: DEFAULT_SLAVE,
            trigger_settle: DEFAULT_TRIGGER_SETTLE,
        }
    }
}
