//! RTU request/response exchange.
//!
//! Every request is `slave, function, data..., crc_lo, crc_hi`. The module
//! answers with the same slave and function, or with `function | 0x80` and a
//! one-byte exception code.

use std::io::{Read, Write};

use jx1000_transport::{serial, SerialStream};
use tracing::{debug, trace};

use crate::config::ModbusConfig;
use crate::crc::{append_crc, verify};
use crate::error::{ModbusError, Result};

/// Read holding registers.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write a single holding register.
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Most registers one read may return.
pub const MAX_READ_REGISTERS: u16 = 125;

/// A Modbus RTU master bound to one slave.
#[derive(Debug)]
pub struct ModbusClient<T> {
    port: T,
    slave: u8,
}

impl ModbusClient<SerialStream> {
    /// Open the named serial port with `config`.
    pub fn open(port: &str, config: &ModbusConfig) -> Result<Self> {
        let stream = serial::open(port, &config.serial)?;
        Ok(Self::new(stream, config.slave))
    }

    /// Use an already-open stream, applying the configured read timeout.
    pub fn connect(mut stream: SerialStream, config: &ModbusConfig) -> Result<Self> {
        stream.set_read_timeout(Some(config.serial.read_timeout))?;
        Ok(Self::new(stream, config.slave))
    }
}

impl<T: Read + Write> ModbusClient<T> {
    pub fn new(port: T, slave: u8) -> Self {
        Self { port, slave }
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    pub fn get_ref(&self) -> &T {
        &self.port
    }

    pub fn into_inner(self) -> T {
        self.port
    }

    /// Read `count` consecutive holding registers starting at `start`.
    pub fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ModbusError::InvalidRequest(format!(
                "register count {count} outside 1..={MAX_READ_REGISTERS}"
            )));
        }

        let mut data = start.to_be_bytes().to_vec();
        data.extend_from_slice(&count.to_be_bytes());
        self.send(READ_HOLDING_REGISTERS, &data)?;

        let response = self.receive(READ_HOLDING_REGISTERS)?;
        let byte_count = usize::from(response[2]);
        if byte_count != usize::from(count) * 2 {
            return Err(ModbusError::UnexpectedResponse(format!(
                "asked for {count} registers, got {byte_count} bytes"
            )));
        }

        let registers = response[3..3 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        debug!(start, count, ?registers, "read holding registers");
        Ok(registers)
    }

    /// Write `value` to the holding register at `addr`.
    ///
    /// The module echoes the request; anything else is an error.
    pub fn write_register(&mut self, addr: u16, value: u16) -> Result<()> {
        let mut data = addr.to_be_bytes().to_vec();
        data.extend_from_slice(&value.to_be_bytes());
        let request = self.send(WRITE_SINGLE_REGISTER, &data)?;

        let response = self.receive(WRITE_SINGLE_REGISTER)?;
        if response != request {
            return Err(ModbusError::UnexpectedResponse(format!(
                "write echo {response:02X?} does not match request {request:02X?}"
            )));
        }
        debug!(addr, value, "wrote register");
        Ok(())
    }

    fn send(&mut self, function: u8, data: &[u8]) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(data.len() + 4);
        frame.push(self.slave);
        frame.push(function);
        frame.extend_from_slice(data);
        append_crc(&mut frame);

        trace!(frame = ?frame, "modbus request");
        self.port.write_all(&frame)?;
        self.port.flush()?;
        Ok(frame)
    }

    /// Read one response to `function`, checksum verified.
    fn receive(&mut self, function: u8) -> Result<Vec<u8>> {
        let mut frame = vec![0u8; 2];
        self.port.read_exact(&mut frame)?;

        if frame[0] != self.slave {
            return Err(ModbusError::UnexpectedResponse(format!(
                "response from slave {} while talking to {}",
                frame[0], self.slave
            )));
        }

        let remaining = if frame[1] == function | EXCEPTION_FLAG {
            3
        } else if frame[1] != function {
            return Err(ModbusError::UnexpectedResponse(format!(
                "function {:#04x} in response to {function:#04x}",
                frame[1]
            )));
        } else if function == READ_HOLDING_REGISTERS {
            let mut byte_count = [0u8; 1];
            self.port.read_exact(&mut byte_count)?;
            frame.push(byte_count[0]);
            usize::from(byte_count[0]) + 2
        } else {
            6
        };

        let start = frame.len();
        frame.resize(start + remaining, 0);
        self.port.read_exact(&mut frame[start..])?;
        trace!(frame = ?frame, "modbus response");

        verify(&frame).map_err(|(expected, actual)| ModbusError::Crc { expected, actual })?;

        if frame[1] & EXCEPTION_FLAG != 0 {
            return Err(ModbusError::Exception {
                function,
                code: frame[2],
            });
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedPort;

    #[test]
    fn read_request_layout() {
        let port = ScriptedPort::new().registers(1, &[0x0102, 0x0304]);
        let mut client = ModbusClient::new(port, 1);

        let values = client.read_holding_registers(1, 2).expect("read");
        assert_eq!(values, vec![0x0102, 0x0304]);
        assert_eq!(
            client.get_ref().written[0],
            vec![0x01, 0x03, 0x00, 0x01, 0x00, 0x02, 0x95, 0xCB]
        );
    }

    #[test]
    fn write_checks_echo() {
        let port = ScriptedPort::new()
            .echo_write(1, 20, 1)
            .echo_write(1, 20, 2);
        let mut client = ModbusClient::new(port, 1);

        client.write_register(20, 1).expect("matching echo");
        let err = client.write_register(20, 1).expect_err("wrong echo");
        assert!(matches!(err, ModbusError::UnexpectedResponse(_)));
    }

    #[test]
    fn exception_response() {
        let port = ScriptedPort::new().reply(vec![0x01, 0x83, 0x02]);
        let mut client = ModbusClient::new(port, 1);

        let err = client.read_holding_registers(9999, 1).expect_err("exception");
        assert!(matches!(
            err,
            ModbusError::Exception {
                function: 0x03,
                code: 0x02
            }
        ));
    }

    #[test]
    fn bad_crc_rejected() {
        let port = ScriptedPort::new().reply_raw(vec![0x01, 0x03, 0x02, 0x00, 0x01, 0x00, 0x00]);
        let mut client = ModbusClient::new(port, 1);

        let err = client.read_holding_registers(23, 1).expect_err("crc");
        assert!(matches!(
            err,
            ModbusError::Crc {
                expected: 0x8479,
                actual: 0
            }
        ));
    }

    #[test]
    fn silence_is_timeout() {
        let mut client = ModbusClient::new(ScriptedPort::new().silence(), 1);
        assert!(matches!(
            client.read_holding_registers(0, 1),
            Err(ModbusError::Timeout)
        ));
    }

    #[test]
    fn truncated_response_is_timeout() {
        let port = ScriptedPort::new().reply_raw(vec![0x01, 0x03, 0x04, 0x00]);
        let mut client = ModbusClient::new(port, 1);
        assert!(matches!(
            client.read_holding_registers(0, 2),
            Err(ModbusError::Timeout)
        ));
    }

    #[test]
    fn foreign_slave_and_function_rejected() {
        let port = ScriptedPort::new()
            .registers(2, &[1])
            .echo_write(1, 5, 5);
        let mut client = ModbusClient::new(port, 1);

        assert!(matches!(
            client.read_holding_registers(0, 1),
            Err(ModbusError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            client.read_holding_registers(0, 1),
            Err(ModbusError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn byte_count_must_match() {
        let port = ScriptedPort::new().registers(1, &[1, 2, 3]);
        let mut client = ModbusClient::new(port, 1);
        assert!(matches!(
            client.read_holding_registers(0, 2),
            Err(ModbusError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn count_bounds() {
        let mut client = ModbusClient::new(ScriptedPort::new(), 1);
        assert!(matches!(
            client.read_holding_registers(0, 0),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.read_holding_registers(0, 126),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(client.get_ref().written.is_empty());
    }
}
