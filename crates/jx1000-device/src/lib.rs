//! JX1000 protocol engine.
//!
//! [`Session`] is the entry point: it owns the port, runs the receive loop,
//! correlates requests with responses and publishes everything the device
//! says on an [`EventBus`]. [`SimulatedDevice`] answers like real firmware
//! over an in-memory channel.

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod pending;
pub mod response;
pub mod session;
pub mod sim;
pub mod upload;

pub use channel::CommandChannel;
pub use config::SessionConfig;
pub use error::{DeviceError, Result};
pub use event::{Event, EventBus, EventValue, Subscriber};
pub use pending::{PendingRequests, PendingSlot, WaitError};
pub use response::{DeviceInfo, MemoryRequest, MemoryResponse, TestVerdict};
pub use session::Session;
pub use sim::{ChunkReply, SimConfig, SimulatedDevice};
pub use upload::{TransferPhase, TransferState, UploadHandle};
