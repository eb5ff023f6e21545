use std::io::{ErrorKind, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use jx1000_frame::{Command, Frame, ReceiveBuffer};
use jx1000_transport::{serial, SerialStream};
use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::event::{Event, EventBus};
use crate::response::{
    DeviceInfo, MemoryRequest, INFO_REQUEST, START_TEST_COMMAND, STOP_TEST_COMMAND,
};
use crate::upload::{self, TransferState, UploadHandle, UploadTiming};

/// A connection to one JX1000 over a serial port.
///
/// All operations take `&self`, so a session can be shared between threads
/// behind an `Arc`. Requests of different kinds run concurrently; requests of
/// the same kind run one after another.
///
/// Received frames are decoded on a background thread and published on the
/// session's [`EventBus`].
pub struct Session {
    port: String,
    config: SessionConfig,
    events: Arc<EventBus>,
    channel: Arc<CommandChannel>,
    running: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    uploading: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a closed session for `port` with default settings.
    pub fn new(port: impl Into<String>) -> Self {
        Self::with_config(port, SessionConfig::default())
    }

    /// Create a closed session with explicit settings.
    pub fn with_config(port: impl Into<String>, config: SessionConfig) -> Self {
        let events = Arc::new(EventBus::new());
        Self {
            port: port.into(),
            config,
            channel: Arc::new(CommandChannel::new(Arc::clone(&events))),
            events,
            running: Arc::new(AtomicBool::new(false)),
            open: Arc::new(AtomicBool::new(false)),
            uploading: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The bus every event of this session is published on.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Install the event callback, replacing any previous one.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(callback);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the serial port and start receiving.
    ///
    /// Opening an open session succeeds without touching the port.
    pub fn open(&self) -> Result<()> {
        let started = {
            let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
            if self.is_open() {
                None
            } else {
                match serial::open(&self.port, &self.config.serial) {
                    Ok(stream) => Some(self.start(stream, &mut receiver)),
                    Err(err) => Some(Err(DeviceError::PortUnavailable(err.to_string()))),
                }
            }
        };

        if let Some(Err(DeviceError::PortUnavailable(reason))) = &started {
            self.publish_status(format!("Failed to open port: {reason}"));
        }
        self.finish_open(started)
    }

    /// Attach an already-open stream instead of opening the named port.
    pub fn open_stream(&self, stream: SerialStream) -> Result<()> {
        let started = {
            let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
            if self.is_open() {
                None
            } else {
                Some(self.start(stream, &mut receiver))
            }
        };
        self.finish_open(started)
    }

    /// Publish the outcome of an open attempt. Must be called without the
    /// receiver lock held: subscribers may re-enter the session.
    fn finish_open(&self, started: Option<Result<()>>) -> Result<()> {
        match started {
            None => {
                self.publish_status(format!("Port {} already open", self.port));
                Ok(())
            }
            Some(Err(err)) => Err(err),
            Some(Ok(())) => {
                info!(port = %self.port, "port opened");
                self.publish_status(format!("Port {} opened", self.port));
                if let Err(err) = self.request_info() {
                    warn!(%err, "info probe after open failed");
                }
                Ok(())
            }
        }
    }

    fn start(&self, mut stream: SerialStream, receiver: &mut Option<JoinHandle<()>>) -> Result<()> {
        // A receive loop that ended on a read error leaves its handle behind.
        if let Some(stale) = receiver.take() {
            let _ = stale.join();
        }

        stream.set_read_timeout(Some(self.config.serial.read_timeout))?;
        let reader = stream.try_clone()?;

        self.channel.attach(stream);
        self.running.store(true, Ordering::Release);
        self.open.store(true, Ordering::Release);

        let context = ReceiveContext {
            port: self.port.clone(),
            channel: Arc::clone(&self.channel),
            events: Arc::clone(&self.events),
            running: Arc::clone(&self.running),
            open: Arc::clone(&self.open),
            read_chunk: self.config.read_chunk.max(1),
            max_buffered: self.config.max_buffered,
        };
        let spawned = thread::Builder::new()
            .name("jx1000-rx".to_string())
            .spawn(move || context.run(reader));

        match spawned {
            Ok(handle) => {
                *receiver = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.running.store(false, Ordering::Release);
                self.open.store(false, Ordering::Release);
                self.channel.detach();
                Err(DeviceError::Spawn {
                    name: "receive",
                    source,
                })
            }
        }
    }

    /// Stop receiving, cancel waiting requests and release the port.
    ///
    /// Safe to call on a closed session.
    pub fn close(&self) {
        let was_open = {
            let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
            self.running.store(false, Ordering::Release);
            let was_open = self.open.swap(false, Ordering::AcqRel);
            self.channel.detach();

            if let Some(handle) = receiver.take() {
                if handle.thread().id() == thread::current().id() {
                    debug!("close called from the receive thread, not joining");
                } else if handle.join().is_err() {
                    warn!("receive thread panicked");
                }
            }
            was_open
        };

        if was_open {
            info!(port = %self.port, "port closed");
            self.publish_status(format!("Port {} closed", self.port));
        }
    }

    /// Read one value from board memory.
    pub fn read_memory(&self, board: u8, channel: u8, addr: u16) -> Result<f32> {
        let request = MemoryRequest::read(board, channel, addr);
        let result = self.channel.send_and_wait(
            &self.channel.pending().read,
            Command::DevRead,
            &request.encode(),
            self.config.read_timeout,
        );
        match result {
            Ok(response) => Ok(response.value),
            Err(err) => Err(self.report_wait_failure(err, "Read timed out")),
        }
    }

    /// Write one value to board memory.
    ///
    /// Any DevWrite frame from the device counts as the acknowledgment.
    pub fn write_memory(&self, board: u8, channel: u8, addr: u16, value: f32) -> Result<()> {
        let request = MemoryRequest::write(board, channel, addr, value);
        let result = self.channel.send_and_wait(
            &self.channel.pending().write,
            Command::DevWrite,
            &request.encode(),
            self.config.write_timeout,
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(self.report_wait_failure(err, "Write timed out")),
        }
    }

    /// Ask the device to identify itself. The answer arrives as an event.
    pub fn request_info(&self) -> Result<()> {
        self.channel.send(Command::Info, &INFO_REQUEST)
    }

    /// Ask the device to identify itself and wait for the answer.
    pub fn query_info(&self) -> Result<DeviceInfo> {
        self.channel
            .query_info(self.config.info_timeout)
            .map_err(|err| self.report_wait_failure(err, "Info timed out"))
    }

    /// Upload a rules file on a background thread.
    ///
    /// Progress is published as RuleDown events; the handle reports the
    /// final phase.
    pub fn download_rules(&self, rules: impl Into<Bytes>) -> Result<UploadHandle> {
        if !self.is_open() {
            self.events.publish(Command::RuleDown, "Port not open");
            return Err(DeviceError::PortUnavailable("port not open".to_string()));
        }

        let state = match TransferState::new(rules.into(), self.config.effective_chunk_size()) {
            Ok(state) => state,
            Err(err) => {
                self.events.publish(Command::RuleDown, "Invalid rules buffer");
                return Err(err);
            }
        };

        if self
            .uploading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.events
                .publish(Command::RuleDown, "Upload already in progress");
            return Err(DeviceError::UploadInProgress);
        }

        let timing = UploadTiming {
            chunk_ack_timeout: self.config.chunk_ack_timeout,
            info_probe_wait: self.config.info_probe_wait,
        };
        upload::spawn(
            Arc::clone(&self.channel),
            state,
            timing,
            Arc::clone(&self.uploading),
        )
    }

    /// Whether a rule upload is running.
    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Acquire)
    }

    /// Start the loaded test sequence.
    pub fn start_test(&self) -> Result<()> {
        self.channel.send(Command::Log, START_TEST_COMMAND)
    }

    /// Stop the running test sequence.
    pub fn stop_test(&self) -> Result<()> {
        self.channel.send(Command::Log, STOP_TEST_COMMAND)
    }

    fn report_wait_failure(&self, err: DeviceError, timeout_message: &str) -> DeviceError {
        if let DeviceError::Timeout { command, after } = &err {
            warn!(%command, ?after, "request timed out");
            self.publish_status(timeout_message);
        }
        err
    }

    fn publish_status(&self, text: impl Into<String>) {
        self.events.publish(Command::Result, text.into());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.port)
            .field("open", &self.is_open())
            .field("uploading", &self.is_uploading())
            .finish()
    }
}

struct ReceiveContext {
    port: String,
    channel: Arc<CommandChannel>,
    events: Arc<EventBus>,
    running: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    read_chunk: usize,
    max_buffered: usize,
}

impl ReceiveContext {
    fn run(self, mut reader: SerialStream) {
        let mut rx = ReceiveBuffer::with_max_buffered(self.max_buffered);
        let mut buf = vec![0u8; self.read_chunk];
        debug!(port = %self.port, "receive loop started");

        while self.running.load(Ordering::Acquire) {
            match reader.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    rx.push(&buf[..n]);
                    while let Some(frame) = rx.next_frame() {
                        self.dispatch(&frame);
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    warn!(port = %self.port, %err, "serial read failed, closing");
                    self.running.store(false, Ordering::Release);
                    self.open.store(false, Ordering::Release);
                    self.channel.detach();
                    self.events
                        .publish(Command::Result, format!("Serial read error: {err}"));
                    break;
                }
            }
        }

        debug!(
            port = %self.port,
            discarded = rx.discarded_bytes(),
            checksum_failures = rx.checksum_failures(),
            "receive loop stopped"
        );
    }

    fn dispatch(&self, frame: &Frame) {
        debug!(command = %frame.command(), len = frame.payload.len(), "frame received");
        match panic::catch_unwind(AssertUnwindSafe(|| self.channel.dispatch(frame))) {
            Ok(event) => self.events.publish_event(&event),
            Err(_) => {
                warn!(command = %frame.command(), "frame handler panicked");
                self.events.publish(
                    Command::Result,
                    format!(
                        "Exception in handler: command={}, len={}",
                        frame.command(),
                        frame.payload.len()
                    ),
                );
            }
        }
    }
}
