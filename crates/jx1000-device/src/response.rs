//! Typed payloads carried by device frames.
//!
//! All multi-byte fields are little-endian.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::Serialize;

/// LOG payload that starts a test run.
pub const START_TEST_COMMAND: &[u8] = b"cmd_EnableExec()\r\n";

/// LOG payload that stops a test run.
pub const STOP_TEST_COMMAND: &[u8] = b"cmd_ExitExec()\r\n";

/// Info request payload.
pub const INFO_REQUEST: [u8; 2] = [0x00, 0x00];

/// A DevRead or DevWrite request: `<u8 board, u8 channel, u16 addr, f32 value>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryRequest {
    pub board: u8,
    pub channel: u8,
    pub addr: u16,
    /// Ignored by the device on reads.
    pub value: f32,
}

impl MemoryRequest {
    /// Encoded size in bytes.
    pub const LEN: usize = 8;

    pub fn read(board: u8, channel: u8, addr: u16) -> Self {
        Self::write(board, channel, addr, 0.0)
    }

    pub fn write(board: u8, channel: u8, addr: u16, value: f32) -> Self {
        Self {
            board,
            channel,
            addr,
            value,
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let mut dst = &mut out[..];
        dst.put_u8(self.board);
        dst.put_u8(self.channel);
        dst.put_u16_le(self.addr);
        dst.put_f32_le(self.value);
        out
    }

    pub fn parse(mut data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            board: data.get_u8(),
            channel: data.get_u8(),
            addr: data.get_u16_le(),
            value: data.get_f32_le(),
        })
    }
}

/// A DevRead or DevWrite response: `<u8 board, u8 channel, u8 result, u16 addr, f32 value>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryResponse {
    pub board: u8,
    pub channel: u8,
    pub result: u8,
    pub addr: u16,
    pub value: f32,
}

impl MemoryResponse {
    /// Encoded size in bytes.
    pub const LEN: usize = 9;

    /// Parse the first nine bytes; trailing bytes are ignored.
    pub fn parse(mut data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            board: data.get_u8(),
            channel: data.get_u8(),
            result: data.get_u8(),
            addr: data.get_u16_le(),
            value: data.get_f32_le(),
        })
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let mut dst = &mut out[..];
        dst.put_u8(self.board);
        dst.put_u8(self.channel);
        dst.put_u8(self.result);
        dst.put_u16_le(self.addr);
        dst.put_f32_le(self.value);
        out
    }
}

impl fmt::Display for MemoryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "com={} ch={} addr={} result={} value={}",
            self.board, self.channel, self.addr, self.result, self.value
        )
    }
}

/// Device identification: `<u8 hard, u8 version_tenths, u8 com, u8 boards, u16 cmd_bytes>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub hard_type: u8,
    /// Firmware version in tenths, `15` for "1.5".
    pub version_tenths: u8,
    pub com_number: u8,
    pub board_count: u8,
    pub cmd_bytes: u16,
    /// Firmware version rendered with one decimal.
    pub version: String,
}

impl DeviceInfo {
    /// Encoded size in bytes.
    pub const LEN: usize = 6;

    pub fn new(
        hard_type: u8,
        version_tenths: u8,
        com_number: u8,
        board_count: u8,
        cmd_bytes: u16,
    ) -> Self {
        Self {
            hard_type,
            version_tenths,
            com_number,
            board_count,
            cmd_bytes,
            version: format!("{:.1}", f64::from(version_tenths) / 10.0),
        }
    }

    pub fn parse(mut data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self::new(
            data.get_u8(),
            data.get_u8(),
            data.get_u8(),
            data.get_u8(),
            data.get_u16_le(),
        ))
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let mut dst = &mut out[..];
        dst.put_u8(self.hard_type);
        dst.put_u8(self.version_tenths);
        dst.put_u8(self.com_number);
        dst.put_u8(self.board_count);
        dst.put_u16_le(self.cmd_bytes);
        out
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HardType={} Version={} ComNumber={} BoardCount={}",
            self.hard_type, self.version, self.com_number, self.board_count
        )
    }
}

/// Outcome reported by a `{ED,<flag>,...}` result line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestVerdict {
    Pass,
    Fail,
}

impl fmt::Display for TestVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestVerdict::Pass => "PASS",
            TestVerdict::Fail => "FAIL",
        })
    }
}

/// Decode device text: invalid UTF-8 sequences are dropped and the result trimmed.
pub fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .replace(char::REPLACEMENT_CHARACTER, "")
        .trim()
        .to_string()
}

/// Recognize a `{ED,<flag>,...}` result line.
pub fn parse_verdict(text: &str) -> Option<TestVerdict> {
    let inner = text.strip_prefix("{ED,")?.strip_suffix('}')?;
    let flag = inner.split(',').next()?.trim();
    Some(if flag == "1" {
        TestVerdict::Pass
    } else {
        TestVerdict::Fail
    })
}

/// Map firmware log lines onto their console wording.
pub fn translate_log(text: &str) -> String {
    if text == "cmd_EnableExec." {
        return "Starting test...".to_string();
    }
    if text.starts_with("cmd") {
        if text.ends_with("Start...") {
            return "Test Start".to_string();
        }
        if text.ends_with("End...") {
            return "Test End".to_string();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        let bytes = MemoryRequest::read(1, 2, 10).encode();
        assert_eq!(bytes, [1, 2, 10, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn write_request_layout() {
        let bytes = MemoryRequest::write(3, 4, 0x0102, 1.0).encode();
        assert_eq!(bytes, [3, 4, 0x02, 0x01, 0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(
            MemoryRequest::parse(&bytes),
            Some(MemoryRequest::write(3, 4, 0x0102, 1.0))
        );
    }

    #[test]
    fn response_parses_little_endian() {
        let mut raw = vec![1, 2, 0, 10, 0];
        raw.extend_from_slice(&2.75f32.to_le_bytes());
        let response = MemoryResponse::parse(&raw).unwrap();
        assert_eq!(response.board, 1);
        assert_eq!(response.channel, 2);
        assert_eq!(response.result, 0);
        assert_eq!(response.addr, 10);
        assert_eq!(response.value, 2.75);
        assert_eq!(response.encode().as_slice(), raw.as_slice());
    }

    #[test]
    fn short_response_rejected() {
        assert!(MemoryResponse::parse(&[1, 2, 3, 4, 5, 6, 7, 8]).is_none());
    }

    #[test]
    fn info_version_string() {
        let info = DeviceInfo::parse(&[2, 15, 1, 4, 0, 0]).unwrap();
        assert_eq!(info.version, "1.5");
        assert_eq!(info.board_count, 4);
        assert_eq!(DeviceInfo::new(1, 100, 1, 1, 0).version, "10.0");
        assert_eq!(DeviceInfo::new(1, 7, 1, 1, 0).version, "0.7");
        assert!(DeviceInfo::parse(&[2, 15, 1]).is_none());
    }

    #[test]
    fn info_display() {
        let info = DeviceInfo::new(2, 15, 1, 4, 0);
        assert_eq!(
            info.to_string(),
            "HardType=2 Version=1.5 ComNumber=1 BoardCount=4"
        );
    }

    #[test]
    fn text_drops_invalid_utf8_and_trims() {
        assert_eq!(decode_text(b"  hello\xFF world \r\n"), "hello world");
        assert_eq!(decode_text(b""), "");
    }

    #[test]
    fn verdicts() {
        assert_eq!(parse_verdict("{ED,1}"), Some(TestVerdict::Pass));
        assert_eq!(parse_verdict("{ED,1,42,ok}"), Some(TestVerdict::Pass));
        assert_eq!(parse_verdict("{ED,0,3}"), Some(TestVerdict::Fail));
        assert_eq!(parse_verdict("{ED, 1 ,x}"), Some(TestVerdict::Pass));
        assert_eq!(parse_verdict("{ED,1"), None);
        assert_eq!(parse_verdict("READY"), None);
    }

    #[test]
    fn log_translation() {
        assert_eq!(translate_log("cmd_EnableExec."), "Starting test...");
        assert_eq!(translate_log("cmd_Test Start..."), "Test Start");
        assert_eq!(translate_log("cmd_Test End..."), "Test End");
        assert_eq!(translate_log("Test End..."), "Test End...");
        assert_eq!(translate_log("board 3 ready"), "board 3 ready");
    }

    #[test]
    fn verdict_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&TestVerdict::Pass).unwrap(),
            "\"PASS\""
        );
    }
}
