//! Mapped voltage registers.
//!
//! Inputs 1000-1499 each map onto two consecutive holding registers that
//! together hold an IEEE-754 float: input `n` lives at `1000 + 2 (n - 1000)`
//! and the register after it.

use std::io::{Read, Write};
use std::str::FromStr;

use serde::Serialize;

use crate::client::ModbusClient;
use crate::error::{ModbusError, Result};

/// First mapped input.
pub const MAPPED_FIRST: u16 = 1000;

/// Last mapped input.
pub const MAPPED_LAST: u16 = 1499;

/// Order of the two 16-bit words of a float.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    /// First register holds the high word.
    #[default]
    Big,
    /// First register holds the low word.
    Little,
}

impl FromStr for WordOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "big" => Ok(WordOrder::Big),
            "little" => Ok(WordOrder::Little),
            other => Err(format!("unknown word order '{other}'")),
        }
    }
}

/// The register pair behind mapped input `input`.
pub fn mapped_registers(input: u16) -> Result<(u16, u16)> {
    if !(MAPPED_FIRST..=MAPPED_LAST).contains(&input) {
        return Err(ModbusError::InvalidMapping(
            "Mapped read requires 1000-1499 input".to_string(),
        ));
    }
    let base = MAPPED_FIRST + (input - MAPPED_FIRST) * 2;
    Ok((base, base + 1))
}

/// Combine two registers into a float. Each register is big-endian.
pub fn registers_to_f32(first: u16, second: u16, order: WordOrder) -> f32 {
    let (high, low) = match order {
        WordOrder::Big => (first, second),
        WordOrder::Little => (second, first),
    };
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// One mapped input and the registers read for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MappedPair {
    pub input: u16,
    pub registers: [u16; 2],
    pub values: [u16; 2],
}

impl MappedPair {
    /// The pair decoded as a float.
    pub fn value(&self, order: WordOrder) -> f32 {
        registers_to_f32(self.values[0], self.values[1], order)
    }
}

fn check_range(start: u16, count: u16) -> Result<()> {
    mapped_registers(start)?;
    let last = u32::from(start) + u32::from(count.max(1)) - 1;
    if last > u32::from(MAPPED_LAST) {
        return Err(ModbusError::InvalidMapping(format!(
            "Requested range exceeds {MAPPED_LAST} (max allowed end is {MAPPED_LAST})"
        )));
    }
    Ok(())
}

impl<T: Read + Write> ModbusClient<T> {
    /// Read `count` mapped inputs starting at `start`, one request per input.
    ///
    /// The whole range is checked before anything is sent.
    pub fn read_mapped_pairs(&mut self, start: u16, count: u16) -> Result<Vec<MappedPair>> {
        check_range(start, count)?;

        let mut pairs = Vec::with_capacity(usize::from(count));
        for input in start..start + count {
            let (first, second) = mapped_registers(input)?;
            let values = self.read_holding_registers(first, 2)?;
            pairs.push(MappedPair {
                input,
                registers: [first, second],
                values: [values[0], values[1]],
            });
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedPort;

    #[test]
    fn mapping_rule() {
        assert_eq!(mapped_registers(1000).unwrap(), (1000, 1001));
        assert_eq!(mapped_registers(1001).unwrap(), (1002, 1003));
        assert_eq!(mapped_registers(1499).unwrap(), (1998, 1999));
        assert!(mapped_registers(999).is_err());
        assert!(mapped_registers(1500).is_err());
    }

    #[test]
    fn float_decode() {
        assert_eq!(registers_to_f32(0x4120, 0x0000, WordOrder::Big), 10.0);
        assert_eq!(registers_to_f32(0x0000, 0x4120, WordOrder::Little), 10.0);
        assert_eq!(registers_to_f32(0xC0A0, 0x0000, WordOrder::Big), -5.0);
    }

    #[test]
    fn word_order_parses() {
        assert_eq!("BIG".parse::<WordOrder>().unwrap(), WordOrder::Big);
        assert_eq!("little".parse::<WordOrder>().unwrap(), WordOrder::Little);
        assert!("middle".parse::<WordOrder>().is_err());
    }

    #[test]
    fn range_errors_match_messages() {
        let mut client = ModbusClient::new(ScriptedPort::new(), 1);

        let err = client.read_mapped_pairs(900, 1).expect_err("below range");
        assert_eq!(err.to_string(), "Mapped read requires 1000-1499 input");

        let err = client.read_mapped_pairs(1498, 3).expect_err("past end");
        assert!(err.to_string().starts_with("Requested range exceeds 1499"));
        assert!(client.get_ref().written.is_empty());
    }

    #[test]
    fn reads_each_pair() {
        let port = ScriptedPort::new()
            .registers(1, &[0x4120, 0x0000])
            .registers(1, &[0x4148, 0x0000]);
        let mut client = ModbusClient::new(port, 1);

        let pairs = client.read_mapped_pairs(1498, 2).expect("read pairs");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].registers, [1996, 1997]);
        assert_eq!(pairs[1].registers, [1998, 1999]);
        assert_eq!(pairs[0].value(WordOrder::Big), 10.0);
        assert_eq!(pairs[1].value(WordOrder::Big), 12.5);

        let written = &client.get_ref().written;
        assert_eq!(&written[0][2..6], &[0x07, 0xCC, 0x00, 0x02]);
        assert_eq!(&written[1][2..6], &[0x07, 0xCE, 0x00, 0x02]);
    }

    #[test]
    fn zero_count_reads_nothing() {
        let mut client = ModbusClient::new(ScriptedPort::new(), 1);
        assert!(client.read_mapped_pairs(1000, 0).expect("empty").is_empty());
        assert!(client.get_ref().written.is_empty());
    }
}
