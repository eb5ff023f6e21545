//! Command codes.
//!
//! The command byte follows the length byte in every frame. Host requests and
//! device responses share the same code for a given operation.

use serde::{Serialize, Serializer};

/// Device identification / probe.
pub const INFO: u8 = 0x01;

/// Rule-file chunk upload.
pub const RULE_DOWN: u8 = 0x02;

/// Memory read.
pub const DEV_READ: u8 = 0x21;

/// Memory write.
pub const DEV_WRITE: u8 = 0x22;

/// Test results and status text.
pub const RESULT: u8 = 0xFE;

/// Free-form log text; also carries test start/stop commands.
pub const LOG: u8 = 0xFF;

/// A frame command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Info,
    RuleDown,
    DevRead,
    DevWrite,
    Result,
    Log,
    /// A code this driver does not know.
    Other(u8),
}

impl Command {
    /// The wire code of this command.
    pub fn code(self) -> u8 {
        u8::from(self)
    }

    /// Short upper-case name used in console output.
    pub fn name(self) -> &'static str {
        match self {
            Command::Info => "INFO",
            Command::RuleDown => "RULE",
            Command::DevRead => "READ",
            Command::DevWrite => "WRITE",
            Command::Result => "RES",
            Command::Log => "LOG",
            Command::Other(_) => "OTHER",
        }
    }
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            INFO => Command::Info,
            RULE_DOWN => Command::RuleDown,
            DEV_READ => Command::DevRead,
            DEV_WRITE => Command::DevWrite,
            RESULT => Command::Result,
            LOG => Command::Log,
            other => Command::Other(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::Info => INFO,
            Command::RuleDown => RULE_DOWN,
            Command::DevRead => DEV_READ,
            Command::DevWrite => DEV_WRITE,
            Command::Result => RESULT,
            Command::Log => LOG,
            Command::Other(code) => code,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Other(code) => write!(f, "0x{code:02X}"),
            known => f.write_str(known.name()),
        }
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for code in 0..=u8::MAX {
            assert_eq!(Command::from(code).code(), code);
        }
    }

    #[test]
    fn known_codes() {
        assert_eq!(Command::from(0x01), Command::Info);
        assert_eq!(Command::from(0x02), Command::RuleDown);
        assert_eq!(Command::from(0x21), Command::DevRead);
        assert_eq!(Command::from(0x22), Command::DevWrite);
        assert_eq!(Command::from(0xFE), Command::Result);
        assert_eq!(Command::from(0xFF), Command::Log);
        assert_eq!(Command::from(0x42), Command::Other(0x42));
    }

    #[test]
    fn display_uses_console_names() {
        assert_eq!(Command::DevRead.to_string(), "READ");
        assert_eq!(Command::RuleDown.to_string(), "RULE");
        assert_eq!(Command::Other(0x10).to_string(), "0x10");
    }
}
