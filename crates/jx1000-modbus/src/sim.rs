//! In-process stand-in for the I/O module.
//!
//! [`SimulatedModule`] owns the slave end of a loopback pair and answers
//! register reads and writes from an in-memory register map. Raising the
//! test trigger stores the configured outcome in the result register.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jx1000_transport::SerialStream;
use tracing::{debug, warn};

use crate::client::{EXCEPTION_FLAG, READ_HOLDING_REGISTERS, WRITE_SINGLE_REGISTER};
use crate::crc::{append_crc, verify};
use crate::error::{ModbusError, Result};
use crate::sequence::{RESULT_REGISTER, TRIGGER_REGISTER};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Both supported requests are eight bytes long.
const REQUEST_LEN: usize = 8;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Simulator behavior.
#[derive(Debug, Clone)]
pub struct ModuleSimConfig {
    pub slave: u8,
    /// Written to the result register when the trigger is raised.
    pub result_code: u16,
    /// Initial register contents.
    pub registers: HashMap<u16, u16>,
}

impl Default for ModuleSimConfig {
    fn default() -> Self {
        Self {
            slave: 1,
            result_code: 1,
            registers: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct ModuleState {
    registers: HashMap<u16, u16>,
    writes: Vec<(u16, u16)>,
}

/// A simulated I/O module running on its own thread.
#[derive(Debug)]
pub struct SimulatedModule {
    state: Arc<Mutex<ModuleState>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedModule {
    /// Create a loopback pair, run the module on one end and return the other.
    pub fn pair(config: ModuleSimConfig) -> Result<(SerialStream, Self)> {
        let (host, module) = SerialStream::pair();
        Ok((host, Self::spawn(module, config)?))
    }

    /// Run the module on an existing stream.
    pub fn spawn(mut stream: SerialStream, config: ModuleSimConfig) -> Result<Self> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let state = Arc::new(Mutex::new(ModuleState {
            registers: config.registers.clone(),
            writes: Vec::new(),
        }));
        let running = Arc::new(AtomicBool::new(true));

        let responder = Responder {
            slave: config.slave,
            result_code: config.result_code,
            state: Arc::clone(&state),
        };
        let loop_running = Arc::clone(&running);
        let worker = thread::Builder::new()
            .name("jx1000-modbus-sim".to_string())
            .spawn(move || responder.run(stream, &loop_running))
            .map_err(ModbusError::Io)?;

        Ok(Self {
            state,
            running,
            worker: Some(worker),
        })
    }

    pub fn set_register(&self, addr: u16, value: u16) {
        lock(&self.state).registers.insert(addr, value);
    }

    pub fn register(&self, addr: u16) -> u16 {
        lock(&self.state).registers.get(&addr).copied().unwrap_or(0)
    }

    /// Store `value` as a big-word-order float in the pair behind `input`.
    pub fn set_mapped_value(&self, input: u16, value: f32) -> Result<()> {
        let (first, second) = crate::mapping::mapped_registers(input)?;
        let bits = value.to_bits();
        let mut state = lock(&self.state);
        state.registers.insert(first, (bits >> 16) as u16);
        state.registers.insert(second, bits as u16);
        Ok(())
    }

    /// Every register write received, in order.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        lock(&self.state).writes.clone()
    }

    /// Stop the simulator thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("modbus simulator thread panicked");
            }
        }
    }
}

impl Drop for SimulatedModule {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Responder {
    slave: u8,
    result_code: u16,
    state: Arc<Mutex<ModuleState>>,
}

impl Responder {
    fn run(&self, mut stream: SerialStream, running: &AtomicBool) {
        let mut pending = Vec::new();
        let mut buf = [0u8; 64];

        while running.load(Ordering::Acquire) {
            match stream.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    while pending.len() >= REQUEST_LEN {
                        if verify(&pending[..REQUEST_LEN]).is_err() {
                            pending.remove(0);
                            continue;
                        }
                        let request: Vec<u8> = pending.drain(..REQUEST_LEN).collect();
                        if let Some(reply) = self.handle(&request) {
                            if let Err(err) = stream.write_all(&reply) {
                                warn!(%err, "modbus simulator reply failed");
                            }
                        }
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
                    warn!(%err, "modbus simulator read failed");
                    break;
                }
            }
        }
    }

    fn handle(&self, request: &[u8]) -> Option<Vec<u8>> {
        if request[0] != self.slave {
            return None;
        }
        let function = request[1];
        let addr = u16::from_be_bytes([request[2], request[3]]);
        let operand = u16::from_be_bytes([request[4], request[5]]);
        debug!(function, addr, operand, "modbus simulator request");

        let mut reply = vec![self.slave];
        match function {
            READ_HOLDING_REGISTERS => {
                if operand == 0 || operand > 125 {
                    reply.extend_from_slice(&[function | EXCEPTION_FLAG, ILLEGAL_DATA_VALUE]);
                } else {
                    let state = lock(&self.state);
                    reply.push(function);
                    reply.push((operand * 2) as u8);
                    for offset in 0..operand {
                        let value = state
                            .registers
                            .get(&addr.wrapping_add(offset))
                            .copied()
                            .unwrap_or(0);
                        reply.extend_from_slice(&value.to_be_bytes());
                    }
                }
            }
            WRITE_SINGLE_REGISTER => {
                let mut state = lock(&self.state);
                state.registers.insert(addr, operand);
                state.writes.push((addr, operand));
                if addr == TRIGGER_REGISTER && operand == 1 {
                    state.registers.insert(RESULT_REGISTER, self.result_code);
                }
                reply.extend_from_slice(&request[1..6]);
            }
            other => reply.extend_from_slice(&[other | EXCEPTION_FLAG, ILLEGAL_FUNCTION]),
        }
        append_crc(&mut reply);
        Some(reply)
    }
}
