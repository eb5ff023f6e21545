/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the `0xA5 0x5E` header.
    #[error("invalid frame header (expected 0xA5 0x5E)")]
    InvalidHeader,

    /// The payload does not fit the 1-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The raw span does not match the length declared in the frame.
    #[error("frame length mismatch (declared {declared}, got {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The trailing checksum byte does not match the frame contents.
    #[error("checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// An I/O error occurred while writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel accepted no bytes.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
