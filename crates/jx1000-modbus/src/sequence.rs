//! Test trigger handshake and digital outputs.

use std::fmt;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::client::ModbusClient;
use crate::error::{ModbusError, Result};

/// Writing 1 here starts a test.
pub const TRIGGER_REGISTER: u16 = 20;

/// Holds the outcome of the last test.
pub const RESULT_REGISTER: u16 = 23;

/// Result register contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "code")]
pub enum TestOutcome {
    NotTested,
    Pass,
    Fail,
    Unknown(u16),
}

impl From<u16> for TestOutcome {
    fn from(code: u16) -> Self {
        match code {
            0 => TestOutcome::NotTested,
            1 => TestOutcome::Pass,
            2 => TestOutcome::Fail,
            other => TestOutcome::Unknown(other),
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::NotTested => f.write_str("Not tested"),
            TestOutcome::Pass => f.write_str("PASS"),
            TestOutcome::Fail => f.write_str("NG"),
            TestOutcome::Unknown(_) => f.write_str("Unknown"),
        }
    }
}

/// A digital output of the module.
///
/// Each output is a pair of registers: the first is written 1 to switch on,
/// the second is written 1 to switch off. The two are never both 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Output {
    One,
    Two,
}

impl Output {
    /// The "on" register. The "off" register follows it.
    pub fn register(self) -> u16 {
        match self {
            Output::One => 120,
            Output::Two => 130,
        }
    }
}

impl TryFrom<u8> for Output {
    type Error = ModbusError;

    fn try_from(number: u8) -> Result<Self> {
        match number {
            1 => Ok(Output::One),
            2 => Ok(Output::Two),
            other => Err(ModbusError::InvalidRequest(format!(
                "output {other} does not exist, expected 1 or 2"
            ))),
        }
    }
}

impl<T: Read + Write> ModbusClient<T> {
    /// Raise the test trigger, wait `settle`, then read the result register.
    pub fn run_test(&mut self, settle: Duration) -> Result<TestOutcome> {
        self.write_register(TRIGGER_REGISTER, 1)?;
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        let code = self.read_holding_registers(RESULT_REGISTER, 1)?[0];
        let outcome = TestOutcome::from(code);
        info!(code, %outcome, "module test finished");
        Ok(outcome)
    }

    /// Switch `output` on or off.
    ///
    /// The register being released is cleared before the other one is set.
    pub fn set_output(&mut self, output: Output, on: bool) -> Result<()> {
        let on_register = output.register();
        let off_register = on_register + 1;
        if on {
            self.write_register(off_register, 0)?;
            self.write_register(on_register, 1)?;
        } else {
            self.write_register(on_register, 0)?;
            self.write_register(off_register, 1)?;
        }
        info!(?output, on, "output switched");
        Ok(())
    }
}
