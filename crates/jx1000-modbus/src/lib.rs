//! Modbus RTU client for the I/O module that sits next to a JX1000.
//!
//! The module exposes holding registers over RS-485. [`ModbusClient`] reads
//! and writes them (functions 0x03 and 0x06), decodes the mapped voltage
//! pairs at 1000-1499 and drives the trigger/result test handshake.
//! [`SimulatedModule`] answers like the real module over a loopback pair.

pub mod client;
pub mod config;
pub mod crc;
pub mod error;
pub mod mapping;
pub mod sequence;
pub mod sim;

#[cfg(test)]
mod scripted;

pub use client::ModbusClient;
pub use config::ModbusConfig;
pub use crc::crc16;
pub use error::{ModbusError, Result};
pub use mapping::{mapped_registers, registers_to_f32, MappedPair, WordOrder};
pub use sequence::{Output, TestOutcome};
pub use sim::{ModuleSimConfig, SimulatedModule};
