use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jx1000_frame::{Command, Frame, FrameError, FrameWriter};
use jx1000_transport::SerialStream;
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};
use crate::event::{Event, EventBus, EventValue};
use crate::pending::{PendingRequests, PendingSlot, WaitError};
use crate::response::{
    decode_text, parse_verdict, translate_log, DeviceInfo, MemoryResponse, INFO_REQUEST,
};

/// Sends commands, correlates their responses and turns received frames
/// into events.
///
/// Writes are serialized on one writer handle. Responses are matched by
/// command kind through [`PendingRequests`].
pub struct CommandChannel {
    writer: Mutex<Option<FrameWriter<SerialStream>>>,
    pending: PendingRequests,
    events: Arc<EventBus>,
}

impl CommandChannel {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            writer: Mutex::new(None),
            pending: PendingRequests::default(),
            events,
        }
    }

    /// Use `stream` for all subsequent writes.
    pub fn attach(&self, stream: SerialStream) {
        *self.lock_writer() = Some(FrameWriter::new(stream));
    }

    /// Drop the writer and cancel every waiting request.
    ///
    /// Returns whether a writer was attached.
    pub fn detach(&self) -> bool {
        let was_attached = self.lock_writer().take().is_some();
        self.pending.cancel_all();
        was_attached
    }

    pub fn is_attached(&self) -> bool {
        self.lock_writer().is_some()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Encode and write one frame.
    ///
    /// Fails with [`DeviceError::PortUnavailable`] when no port is attached
    /// or the write fails; both cases also publish an event.
    pub fn send(&self, command: Command, payload: &[u8]) -> Result<()> {
        let outcome = {
            let mut writer = self.lock_writer();
            writer
                .as_mut()
                .map(|writer| writer.send(command, payload))
        };

        match outcome {
            Some(Ok(())) => {
                debug!(%command, len = payload.len(), "frame sent");
                Ok(())
            }
            None => {
                self.events.publish(Command::Result, "Port not open");
                Err(DeviceError::PortUnavailable("port not open".to_string()))
            }
            Some(Err(err @ (FrameError::Io(_) | FrameError::ConnectionClosed))) => {
                warn!(%command, %err, "serial write failed");
                self.events
                    .publish(Command::Result, format!("Serial write error: {err}"));
                Err(DeviceError::PortUnavailable(err.to_string()))
            }
            Some(Err(err)) => Err(err.into()),
        }
    }

    /// Send a frame and wait for the response routed to `slot`.
    ///
    /// A timeout is returned without publishing; callers report it.
    pub fn send_and_wait<T>(
        &self,
        slot: &PendingSlot<T>,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<T> {
        let armed = slot.arm();
        self.send(command, payload)?;
        armed.wait(timeout).map_err(|err| match err {
            WaitError::TimedOut => DeviceError::Timeout {
                command,
                after: timeout,
            },
            WaitError::Cancelled => DeviceError::Cancelled,
        })
    }

    /// Ask the device to identify itself and wait for the answer.
    pub fn query_info(&self, timeout: Duration) -> Result<DeviceInfo> {
        self.send_and_wait(&self.pending.info, Command::Info, &INFO_REQUEST, timeout)
    }

    /// Decode a received frame, resolve the matching request and return the
    /// event describing it.
    pub fn dispatch(&self, frame: &Frame) -> Event {
        let command = frame.command();
        let data = frame.payload.as_ref();

        let value = match command {
            Command::DevRead => match MemoryResponse::parse(data) {
                Some(response) => {
                    self.pending.read.resolve(response);
                    EventValue::Memory(response)
                }
                None => EventValue::Raw(data.to_vec()),
            },
            Command::DevWrite => {
                let parsed = MemoryResponse::parse(data);
                self.pending.write.resolve(parsed);
                match parsed {
                    Some(response) => EventValue::Memory(response),
                    None => EventValue::Raw(data.to_vec()),
                }
            }
            Command::Info => match DeviceInfo::parse(data) {
                Some(info) => {
                    self.pending.info.resolve(info.clone());
                    EventValue::Info(info)
                }
                None => EventValue::Raw(data.to_vec()),
            },
            Command::RuleDown => match data.first() {
                Some(&status) => {
                    let ok = status == 1;
                    self.pending.rule_ack.resolve(ok);
                    EventValue::RuleAck(ok)
                }
                None => EventValue::from("No ACK byte"),
            },
            Command::Result => {
                let text = decode_text(data);
                match parse_verdict(&text) {
                    Some(verdict) => EventValue::Verdict(verdict),
                    None => EventValue::Text(text),
                }
            }
            Command::Log => EventValue::Text(translate_log(&decode_text(data))),
            Command::Other(_) => EventValue::Raw(data.to_vec()),
        };

        Event { command, value }
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<FrameWriter<SerialStream>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("attached", &self.is_attached())
            .field("pending", &self.pending)
            .finish()
    }
}
