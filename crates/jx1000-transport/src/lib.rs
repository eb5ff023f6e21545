//! Serial byte-channel abstraction for the JX1000 driver.
//!
//! Provides a unified stream over:
//! - a physical serial port (via the `serialport` crate)
//! - an in-memory loopback pair (simulation and tests)
//!
//! This is the lowest layer of the driver. Everything else builds on top of
//! the [`SerialStream`] type provided here.

pub mod error;
pub mod loopback;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use loopback::LoopbackPort;
pub use serial::{Parity, SerialConfig};
pub use traits::SerialStream;
