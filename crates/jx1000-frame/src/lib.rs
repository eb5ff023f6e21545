//! JX1000 wire format.
//!
//! Every message on the wire is framed as:
//! - A 2-byte header (`0xA5 0x5E`) for stream synchronization
//! - A 1-byte payload length
//! - A 1-byte command code
//! - The payload
//! - A 1-byte wrap-around checksum over everything before it
//!
//! [`ReceiveBuffer`] turns a noisy byte stream back into validated frames.

pub mod buffer;
pub mod codec;
pub mod command;
pub mod error;
pub mod writer;

pub use buffer::{ReceiveBuffer, DEFAULT_MAX_BUFFERED};
pub use codec::{
    checksum, decode_frame, encode_frame, Frame, HEADER, MAX_PAYLOAD, MIN_FRAME_LEN, OVERHEAD,
};
pub use command::Command;
pub use error::{FrameError, Result};
pub use writer::FrameWriter;
