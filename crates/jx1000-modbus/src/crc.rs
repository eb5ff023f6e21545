//! Modbus RTU checksum.

const POLY: u16 = 0xA001;

/// CRC-16/MODBUS of `data`. Sent low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    crc
}

/// Append the checksum of `frame` to it.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing checksum of a complete frame.
pub fn verify(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < 2 {
        return Err((0, 0));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    let actual = u16::from_le_bytes([tail[0], tail[1]]);
    if expected == actual {
        Ok(())
    } else {
        Err((expected, actual))
    }
}
