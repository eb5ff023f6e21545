//! Serial driver for the JX1000 industrial test instrument.
//!
//! The instrument speaks a checksummed binary frame protocol over a serial
//! line. A companion I/O module on the same bench speaks Modbus RTU.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial port and in-memory loopback byte channels
//! - [`frame`]: frame codec and resynchronizing receive buffer
//! - [`device`]: port session, request correlation, rule upload, events
//! - [`modbus`]: Modbus RTU client for the I/O module (behind `modbus` feature)
//!
//! ```no_run
//! use jx1000::device::Session;
//!
//! let session = Session::new("/dev/ttyUSB0");
//! session.subscribe(|event| println!("{event}"));
//! session.open()?;
//! let value = session.read_memory(1, 2, 10)?;
//! println!("value = {value}");
//! # Ok::<(), jx1000::device::DeviceError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use jx1000_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use jx1000_frame::*;
}

/// Re-export device types.
pub mod device {
    pub use jx1000_device::*;
}

/// Re-export Modbus types (requires `modbus` feature).
#[cfg(feature = "modbus")]
pub mod modbus {
    pub use jx1000_modbus::*;
}
