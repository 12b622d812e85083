/// Errors that can occur while encoding, decoding or validating records.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The byte count does not fit the variable-length write encoding.
    #[error("invalid record length ({len} bytes, expected {min}..={max})")]
    InvalidLength { len: usize, min: usize, max: usize },

    /// The `Type` field is not a transmittable frame type.
    #[error("invalid frame type {0}")]
    InvalidType(u32),

    /// The identifier uses bits reserved for the status record discriminator.
    #[error("identifier {0:#010x} uses reserved bits")]
    ReservedIdBits(u32),

    /// `DataLength` is larger than a classic CAN payload.
    #[error("data length {0} exceeds 8")]
    DataLengthTooLarge(u32),

    /// The supplied byte count does not cover `DataLength` payload bytes.
    #[error("data length {data_length} needs {needed} bytes, got {available}")]
    DataLengthMismatch {
        data_length: u32,
        needed: usize,
        available: usize,
    },

    /// An I/O error occurred while reading or writing a record stream.
    #[error("record I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete record was received.
    #[error("stream closed (incomplete record)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
