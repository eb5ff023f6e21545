use bytes::{BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::error::{FrameError, Result};

/// Header bytes that start every frame.
pub const HEADER: [u8; 2] = [0xA5, 0x5E];

/// Bytes around the payload: header (2) + length (1) + command (1) + checksum (1).
pub const OVERHEAD: usize = 5;

/// Smallest complete frame (empty payload).
pub const MIN_FRAME_LEN: usize = OVERHEAD;

/// Largest payload the 1-byte length field can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw command code.
    pub code: u8,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            code: command.code(),
            payload: payload.into(),
        }
    }

    /// The command tag of this frame.
    pub fn command(&self) -> Command {
        Command::from(self.code)
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        OVERHEAD + self.payload.len()
    }

    /// Encode this frame into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_frame(self.command(), &self.payload, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// 8-bit wrap-around sum. This is not a CRC; it only catches simple slips.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────┬─────────┬──────────────────┬──────────┐
/// │ Header (2B)  │ Length │ Command │ Payload          │ Checksum │
/// │ 0xA5 0x5E    │ (1B)   │ (1B)    │ (Length bytes)   │ (1B)     │
/// └──────────────┴────────┴─────────┴──────────────────┴──────────┘
/// ```
///
/// The checksum covers every byte before it, header included.
pub fn encode_frame(command: Command, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let start = dst.len();
    dst.reserve(OVERHEAD + payload.len());
    dst.put_slice(&HEADER);
    dst.put_u8(payload.len() as u8);
    dst.put_u8(command.code());
    dst.put_slice(payload);
    let sum = checksum(&dst[start..]);
    dst.put_u8(sum);
    Ok(())
}

/// Decode one complete frame.
///
/// `raw` must span exactly one frame, as sliced out by
/// [`ReceiveBuffer`](crate::ReceiveBuffer) using the declared length.
pub fn decode_frame(raw: &[u8]) -> Result<Frame> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(FrameError::LengthMismatch {
            declared: MIN_FRAME_LEN,
            actual: raw.len(),
        });
    }

    let (body, tail) = raw.split_at(raw.len() - 1);
    let expected = checksum(body);
    if expected != tail[0] {
        return Err(FrameError::ChecksumMismatch {
            expected,
            actual: tail[0],
        });
    }

    if raw[0..2] != HEADER {
        return Err(FrameError::InvalidHeader);
    }

    let declared = raw[2] as usize + OVERHEAD;
    if raw.len() != declared {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: raw.len(),
        });
    }

    Ok(Frame {
        code: raw[3],
        payload: Bytes::copy_from_slice(&body[4..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(command: Command, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(command, payload, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_layout() {
        let buf = encoded(Command::Info, &[0x00, 0x00]);
        assert_eq!(buf.as_ref(), &[0xA5, 0x5E, 0x02, 0x01, 0x00, 0x00, 0x06]);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = b"hello, jx1000!";
        let buf = encoded(Command::Result, payload);
        assert_eq!(buf.len(), OVERHEAD + payload.len());

        let frame = decode_frame(&buf).unwrap();
        assert_eq!(frame.command(), Command::Result);
        assert_eq!(frame.payload.as_ref(), payload);
    }

    #[test]
    fn test_roundtrip_boundary_sizes() {
        for command in [Command::DevRead, Command::Log, Command::Other(0x7E)] {
            for len in [0usize, 1, 9, 160, MAX_PAYLOAD] {
                let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
                let frame = decode_frame(&encoded(command, &payload)).unwrap();
                assert_eq!(frame.command(), command);
                assert_eq!(frame.payload.as_ref(), payload.as_slice());
            }
        }
    }

    #[test]
    fn test_payload_too_large() {
        let mut buf = BytesMut::new();
        let result = encode_frame(Command::RuleDown, &[0u8; 256], &mut buf);
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { size: 256, max: 255 })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let payload = [1u8, 2, 10, 0, 0xC3, 0xF5, 0x48, 0x40];
        let clean = encoded(Command::DevRead, &payload);

        for index in 0..clean.len() - 1 {
            for bit in 0..8 {
                let mut corrupt = clean.clone();
                corrupt[index] ^= 1 << bit;
                assert!(
                    matches!(
                        decode_frame(&corrupt),
                        Err(FrameError::ChecksumMismatch { .. })
                    ),
                    "flip at byte {index} bit {bit} not detected"
                );
            }
        }
    }

    #[test]
    fn test_wrong_header_with_valid_sum_rejected() {
        let mut raw = vec![0xA4, 0x5F, 0x00, 0x01];
        raw.push(checksum(&raw));
        assert!(matches!(decode_frame(&raw), Err(FrameError::InvalidHeader)));
    }

    #[test]
    fn test_length_mismatch() {
        let mut raw = vec![0xA5, 0x5E, 0x03, 0xFF, b'a'];
        raw.push(checksum(&raw));
        assert!(matches!(
            decode_frame(&raw),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_frame_helpers() {
        let frame = Frame::new(Command::DevWrite, vec![1, 2, 3]);
        assert_eq!(frame.wire_size(), OVERHEAD + 3);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
    }
}
