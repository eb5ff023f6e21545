//! In-process stand-in for a JX1000.
//!
//! [`SimulatedDevice`] owns the device end of a loopback pair and answers
//! frames the way the firmware does. It keeps a memory map for reads and
//! writes, assembles uploaded rules and records everything it receives.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jx1000_frame::{Command, Frame, FrameWriter, ReceiveBuffer};
use jx1000_transport::SerialStream;
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};
use crate::response::{
    DeviceInfo, MemoryRequest, MemoryResponse, TestVerdict, START_TEST_COMMAND, STOP_TEST_COMMAND,
};
use crate::upload::{KIND_DATA, KIND_FINALIZE};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How the simulator answers one rule chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkReply {
    Ack,
    Nack,
    /// Send nothing; the host sees a timeout.
    Silent,
}

/// Simulator behavior.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Answer to Info requests.
    pub info: DeviceInfo,
    /// Replies for successive rule chunks; [`ChunkReply::Ack`] once exhausted.
    pub chunk_replies: Vec<ChunkReply>,
    /// Commands the simulator receives but never answers.
    pub silent: HashSet<Command>,
    /// Acknowledge writes with a one-byte payload instead of a full response.
    pub short_write_ack: bool,
    /// Outcome reported after a test run.
    pub verdict: TestVerdict,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new(2, 15, 1, 4, 0),
            chunk_replies: Vec::new(),
            silent: HashSet::new(),
            short_write_ack: false,
            verdict: TestVerdict::Pass,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    memory: HashMap<(u8, u8, u16), f32>,
    received: Vec<Frame>,
    rules: Vec<u8>,
    finalized: bool,
}

/// A simulated instrument running on its own thread.
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
    writer: Arc<Mutex<FrameWriter<SerialStream>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    /// Create a loopback pair, run the simulator on one end and return the
    /// other end for the host.
    pub fn pair(config: SimConfig) -> Result<(SerialStream, Self)> {
        let (host, device) = SerialStream::pair();
        Ok((host, Self::spawn(device, config)?))
    }

    /// Run the simulator on an existing stream.
    pub fn spawn(mut stream: SerialStream, config: SimConfig) -> Result<Self> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let writer = Arc::new(Mutex::new(FrameWriter::new(stream.try_clone()?)));
        let state = Arc::new(Mutex::new(SimState::default()));
        let running = Arc::new(AtomicBool::new(true));

        let mut responder = Responder {
            config,
            chunk_replies: VecDeque::new(),
            state: Arc::clone(&state),
            writer: Arc::clone(&writer),
        };
        responder.chunk_replies = responder.config.chunk_replies.iter().copied().collect();
        let loop_running = Arc::clone(&running);

        let worker = thread::Builder::new()
            .name("jx1000-sim".to_string())
            .spawn(move || responder.run(stream, &loop_running))
            .map_err(|source| DeviceError::Spawn {
                name: "simulator",
                source,
            })?;

        Ok(Self {
            state,
            writer,
            running,
            worker: Some(worker),
        })
    }

    /// Store a value in the simulated memory map.
    pub fn set_memory(&self, board: u8, channel: u8, addr: u16, value: f32) {
        lock(&self.state).memory.insert((board, channel, addr), value);
    }

    /// Read a value from the simulated memory map.
    pub fn memory(&self, board: u8, channel: u8, addr: u16) -> Option<f32> {
        lock(&self.state).memory.get(&(board, channel, addr)).copied()
    }

    /// Every frame received so far.
    pub fn received(&self) -> Vec<Frame> {
        lock(&self.state).received.clone()
    }

    /// Frames received with `command`.
    pub fn received_of(&self, command: Command) -> Vec<Frame> {
        lock(&self.state)
            .received
            .iter()
            .filter(|frame| frame.command() == command)
            .cloned()
            .collect()
    }

    /// Rule bytes assembled from data chunks.
    pub fn uploaded_rules(&self) -> Vec<u8> {
        lock(&self.state).rules.clone()
    }

    /// Whether the closing rule frame arrived.
    pub fn finalized(&self) -> bool {
        lock(&self.state).finalized
    }

    /// Send an unsolicited frame to the host.
    pub fn emit(&self, command: Command, payload: &[u8]) -> Result<()> {
        lock(&self.writer).send(command, payload)?;
        Ok(())
    }

    /// Write raw bytes to the host, for line noise.
    pub fn emit_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = lock(&self.writer);
        writer
            .get_mut()
            .write_all(bytes)
            .map_err(jx1000_frame::FrameError::Io)?;
        Ok(())
    }

    /// Stop the simulator thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("simulator thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("state", &self.state)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Responder {
    config: SimConfig,
    chunk_replies: VecDeque<ChunkReply>,
    state: Arc<Mutex<SimState>>,
    writer: Arc<Mutex<FrameWriter<SerialStream>>>,
}

impl Responder {
    fn run(&mut self, mut stream: SerialStream, running: &AtomicBool) {
        let mut rx = ReceiveBuffer::new();
        let mut buf = [0u8; 256];

        while running.load(Ordering::Acquire) {
            match stream.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    rx.push(&buf[..n]);
                    while let Some(frame) = rx.next_frame() {
                        self.handle(frame);
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
                    warn!(%err, "simulator read failed");
                    break;
                }
            }
        }
    }

    fn handle(&mut self, frame: Frame) {
        let command = frame.command();
        debug!(%command, len = frame.payload.len(), "simulator received frame");
        lock(&self.state).received.push(frame.clone());

        if self.config.silent.contains(&command) {
            return;
        }

        match command {
            Command::Info => {
                let info = self.config.info.encode();
                self.reply(Command::Info, &info);
            }
            Command::DevRead => {
                if let Some(request) = MemoryRequest::parse(&frame.payload) {
                    let value = lock(&self.state)
                        .memory
                        .get(&(request.board, request.channel, request.addr))
                        .copied()
                        .unwrap_or(0.0);
                    self.reply(Command::DevRead, &respond(&request, value).encode());
                }
            }
            Command::DevWrite => {
                if let Some(request) = MemoryRequest::parse(&frame.payload) {
                    lock(&self.state)
                        .memory
                        .insert((request.board, request.channel, request.addr), request.value);
                    if self.config.short_write_ack {
                        self.reply(Command::DevWrite, &[1]);
                    } else {
                        self.reply(
                            Command::DevWrite,
                            &respond(&request, request.value).encode(),
                        );
                    }
                }
            }
            Command::RuleDown => self.handle_rule_chunk(&frame.payload),
            Command::Log => self.handle_log(&frame.payload),
            Command::Result | Command::Other(_) => {}
        }
    }

    fn handle_rule_chunk(&mut self, payload: &[u8]) {
        if payload.len() < 4 {
            return;
        }
        let kind = payload[0];
        let offset = u16::from_le_bytes([payload[1], payload[2]]) as usize;
        let len = payload[3] as usize;

        match kind {
            KIND_DATA => {
                let data = &payload[4..payload.len().min(4 + len)];
                let reply = self.chunk_replies.pop_front().unwrap_or(ChunkReply::Ack);
                if reply == ChunkReply::Ack {
                    let mut state = lock(&self.state);
                    if state.rules.len() < offset + data.len() {
                        state.rules.resize(offset + data.len(), 0);
                    }
                    state.rules[offset..offset + data.len()].copy_from_slice(data);
                }
                match reply {
                    ChunkReply::Ack => self.reply(Command::RuleDown, &[1]),
                    ChunkReply::Nack => self.reply(Command::RuleDown, &[0]),
                    ChunkReply::Silent => {}
                }
            }
            KIND_FINALIZE => lock(&self.state).finalized = true,
            other => debug!(kind = other, "unknown rule chunk kind"),
        }
    }

    fn handle_log(&mut self, payload: &[u8]) {
        if payload == START_TEST_COMMAND {
            let flag = match self.config.verdict {
                TestVerdict::Pass => 1,
                TestVerdict::Fail => 0,
            };
            self.reply(Command::Log, b"cmd_EnableExec.\r\n");
            self.reply(Command::Log, b"cmd_Test Start...\r\n");
            self.reply(Command::Result, format!("{{ED,{flag},0}}").as_bytes());
            self.reply(Command::Log, b"cmd_Test End...\r\n");
        } else if payload == STOP_TEST_COMMAND {
            self.reply(Command::Log, b"cmd_ExitExec.\r\n");
        }
    }

    fn reply(&self, command: Command, payload: &[u8]) {
        if let Err(err) = lock(&self.writer).send(command, payload) {
            warn!(%command, %err, "simulator reply failed");
        }
    }
}

fn respond(request: &MemoryRequest, value: f32) -> MemoryResponse {
    MemoryResponse {
        board: request.board,
        channel: request.channel,
        result: 0,
        addr: request.addr,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommandChannel;
    use crate::event::EventBus;

    fn host_frames(host: &mut SerialStream, count: usize) -> Vec<Frame> {
        host.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut rx = ReceiveBuffer::new();
        let mut frames = Vec::new();
        let mut buf = [0u8; 256];
        while frames.len() < count {
            let n = host.read(&mut buf).unwrap();
            rx.push(&buf[..n]);
            frames.extend(rx.frames());
        }
        frames
    }

    #[test]
    fn answers_info() {
        let (mut host, sim) = SimulatedDevice::pair(SimConfig::default()).unwrap();
        FrameWriter::new(host.try_clone().unwrap())
            .send(Command::Info, &[0, 0])
            .unwrap();

        let frames = host_frames(&mut host, 1);
        let info = DeviceInfo::parse(&frames[0].payload).unwrap();
        assert_eq!(info.version, "1.5");
        assert_eq!(sim.received_of(Command::Info).len(), 1);
    }

    #[test]
    fn memory_roundtrip() {
        let (mut host, sim) = SimulatedDevice::pair(SimConfig::default()).unwrap();
        let mut writer = FrameWriter::new(host.try_clone().unwrap());

        writer
            .send(Command::DevWrite, &MemoryRequest::write(1, 1, 7, 4.5).encode())
            .unwrap();
        writer
            .send(Command::DevRead, &MemoryRequest::read(1, 1, 7).encode())
            .unwrap();

        let frames = host_frames(&mut host, 2);
        let read = MemoryResponse::parse(&frames[1].payload).unwrap();
        assert_eq!(read.value, 4.5);
        assert_eq!(sim.memory(1, 1, 7), Some(4.5));
    }

    #[test]
    fn chunk_policy_and_assembly() {
        let config = SimConfig {
            chunk_replies: vec![ChunkReply::Ack, ChunkReply::Nack],
            ..SimConfig::default()
        };
        let (mut host, sim) = SimulatedDevice::pair(config).unwrap();
        let mut writer = FrameWriter::new(host.try_clone().unwrap());

        writer
            .send(Command::RuleDown, &crate::upload::chunk_payload(0, b"abc"))
            .unwrap();
        writer
            .send(Command::RuleDown, &crate::upload::chunk_payload(3, b"def"))
            .unwrap();

        let frames = host_frames(&mut host, 2);
        assert_eq!(frames[0].payload.as_ref(), &[1]);
        assert_eq!(frames[1].payload.as_ref(), &[0]);
        assert_eq!(sim.uploaded_rules(), b"abc");
    }

    #[test]
    fn test_run_reports_verdict() {
        let (host, sim) = SimulatedDevice::pair(SimConfig::default()).unwrap();
        let mut reader = host.try_clone().unwrap();
        let channel = CommandChannel::new(Arc::new(EventBus::new()));
        channel.attach(host);

        channel.send(Command::Log, START_TEST_COMMAND).unwrap();
        let events: Vec<String> = host_frames(&mut reader, 4)
            .iter()
            .map(|frame| channel.dispatch(frame).to_string())
            .collect();
        assert_eq!(
            events,
            vec![
                "[LOG] Starting test...",
                "[LOG] Test Start",
                "[RES] PASS",
                "[LOG] Test End"
            ]
        );
        drop(sim);
    }
}
