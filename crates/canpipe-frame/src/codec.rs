use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};
use crate::status::{StatusFlags, STATUS_CHANGE_FLAG};

/// Record size: id (4) + type (4) + data length (4) + data (8) = 20 bytes.
pub const FRAME_SIZE: usize = 20;

/// Fixed header preceding the payload bytes.
pub const HEADER_SIZE: usize = 12;

/// Classic CAN payload limit.
pub const MAX_DATA_LENGTH: usize = 8;

/// Shortest accepted write: header with zero payload bytes.
pub const MIN_WRITE_SIZE: usize = FRAME_SIZE - MAX_DATA_LENGTH;

/// Identifier bits reserved for the status record discriminator.
pub const RESERVED_ID_MASK: u32 = 0xE000_0000;

/// Largest 29-bit identifier.
pub const MAX_EXTENDED_ID: u32 = !RESERVED_ID_MASK;

/// One record exactly as it sits in a pool slot or a client buffer.
pub type RawRecord = [u8; FRAME_SIZE];

/// Frame types on the wire. Remote frames are not supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FrameType {
    #[default]
    Undefined = 0,
    Standard = 1,
    Extended = 2,
}

impl FrameType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Undefined),
            1 => Some(Self::Standard),
            2 => Some(Self::Extended),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Only standard and extended frames may be transmitted.
    pub fn is_transmittable(self) -> bool {
        matches!(self, Self::Standard | Self::Extended)
    }
}

/// A single CAN frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanFrame {
    pub id: u32,
    pub frame_type: FrameType,
    pub data_length: u8,
    pub data: [u8; MAX_DATA_LENGTH],
}

impl CanFrame {
    /// Create a frame from a payload slice. Bytes past the eighth are ignored.
    pub fn new(id: u32, frame_type: FrameType, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_DATA_LENGTH);
        let mut data = [0u8; MAX_DATA_LENGTH];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id,
            frame_type,
            data_length: len as u8,
            data,
        }
    }

    pub fn standard(id: u32, payload: &[u8]) -> Self {
        Self::new(id, FrameType::Standard, payload)
    }

    pub fn extended(id: u32, payload: &[u8]) -> Self {
        Self::new(id, FrameType::Extended, payload)
    }

    /// The meaningful payload bytes.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.data_length).min(MAX_DATA_LENGTH);
        &self.data[..len]
    }

    /// Bytes needed on the wire to carry this frame's payload.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload().len()
    }

    pub fn to_record(&self) -> RawRecord {
        let mut record = [0u8; FRAME_SIZE];
        encode_frame(self, &mut &mut record[..]);
        record
    }
}

/// Synthesized record reporting hardware error and state changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status1: StatusFlags,
    pub status2: u32,
    pub status3: u32,
    pub status4: u32,
}

impl StatusRecord {
    pub fn new(status1: StatusFlags) -> Self {
        Self {
            status1,
            ..Self::default()
        }
    }

    pub fn to_record(&self) -> RawRecord {
        let mut record = [0u8; FRAME_SIZE];
        encode_status(self, &mut &mut record[..]);
        record
    }
}

/// What a client reads: a received frame or a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Frame(CanFrame),
    Status(StatusRecord),
}

impl Message {
    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status(_))
    }

    pub fn to_record(&self) -> RawRecord {
        match self {
            Self::Frame(frame) => frame.to_record(),
            Self::Status(status) => status.to_record(),
        }
    }
}

impl From<CanFrame> for Message {
    fn from(frame: CanFrame) -> Self {
        Self::Frame(frame)
    }
}

impl From<StatusRecord> for Message {
    fn from(status: StatusRecord) -> Self {
        Self::Status(status)
    }
}

/// Encode a frame as a full 20-byte record.
///
/// Wire format:
/// ```text
/// ┌───────────┬───────────┬──────────────┬──────────────┐
/// │ Id        │ Type      │ DataLength   │ Data         │
/// │ (4B LE)   │ (4B LE)   │ (4B LE)      │ (8B)         │
/// └───────────┴───────────┴──────────────┴──────────────┘
/// ```
pub fn encode_frame(frame: &CanFrame, dst: &mut impl BufMut) {
    dst.put_u32_le(frame.id);
    dst.put_u32_le(frame.frame_type.as_raw());
    dst.put_u32_le(u32::from(frame.data_length));
    dst.put_slice(&frame.data);
}

/// Encode a status record; same size as a frame.
pub fn encode_status(status: &StatusRecord, dst: &mut impl BufMut) {
    dst.put_u32_le(STATUS_CHANGE_FLAG);
    dst.put_u32_le(status.status1.bits());
    dst.put_u32_le(status.status2);
    dst.put_u32_le(status.status3);
    dst.put_u32_le(status.status4);
}

pub fn encode_message(message: &Message, dst: &mut impl BufMut) {
    match message {
        Message::Frame(frame) => encode_frame(frame, dst),
        Message::Status(status) => encode_status(status, dst),
    }
}

/// Decode one full record as delivered to a reader.
///
/// A first word equal to [`STATUS_CHANGE_FLAG`] marks a status record; any
/// other use of the reserved identifier bits is rejected.
pub fn decode_message(src: &[u8]) -> Result<Message> {
    if src.len() < FRAME_SIZE {
        return Err(FrameError::InvalidLength {
            len: src.len(),
            min: FRAME_SIZE,
            max: FRAME_SIZE,
        });
    }
    let mut buf = &src[..FRAME_SIZE];
    let first = buf.get_u32_le();

    if first == STATUS_CHANGE_FLAG {
        return Ok(Message::Status(StatusRecord {
            status1: StatusFlags::from_bits_retain(buf.get_u32_le()),
            status2: buf.get_u32_le(),
            status3: buf.get_u32_le(),
            status4: buf.get_u32_le(),
        }));
    }
    if first & RESERVED_ID_MASK != 0 {
        return Err(FrameError::ReservedIdBits(first));
    }

    let raw_type = buf.get_u32_le();
    let frame_type = FrameType::from_raw(raw_type).ok_or(FrameError::InvalidType(raw_type))?;
    let data_length = buf.get_u32_le();
    if data_length as usize > MAX_DATA_LENGTH {
        return Err(FrameError::DataLengthTooLarge(data_length));
    }
    let mut data = [0u8; MAX_DATA_LENGTH];
    buf.copy_to_slice(&mut data);

    Ok(Message::Frame(CanFrame {
        id: first,
        frame_type,
        data_length: data_length as u8,
        data,
    }))
}

/// Validate and decode a client write.
///
/// `src` may be truncated to cover only `DataLength` payload bytes, down to
/// [`MIN_WRITE_SIZE`]. Missing payload bytes read as zero.
pub fn decode_write(src: &[u8]) -> Result<CanFrame> {
    if src.len() < MIN_WRITE_SIZE || src.len() > FRAME_SIZE {
        return Err(FrameError::InvalidLength {
            len: src.len(),
            min: MIN_WRITE_SIZE,
            max: FRAME_SIZE,
        });
    }
    let mut record = [0u8; FRAME_SIZE];
    record[..src.len()].copy_from_slice(src);

    let mut buf = &record[..];
    let id = buf.get_u32_le();
    let raw_type = buf.get_u32_le();
    let data_length = buf.get_u32_le();

    let frame_type = FrameType::from_raw(raw_type)
        .filter(|ty| ty.is_transmittable())
        .ok_or(FrameError::InvalidType(raw_type))?;
    if id & RESERVED_ID_MASK != 0 {
        return Err(FrameError::ReservedIdBits(id));
    }
    if data_length as usize > MAX_DATA_LENGTH {
        return Err(FrameError::DataLengthTooLarge(data_length));
    }
    let needed = HEADER_SIZE + data_length as usize;
    if needed > src.len() {
        return Err(FrameError::DataLengthMismatch {
            data_length,
            needed,
            available: src.len(),
        });
    }

    let mut data = [0u8; MAX_DATA_LENGTH];
    buf.copy_to_slice(&mut data);

    Ok(CanFrame {
        id,
        frame_type,
        data_length: data_length as u8,
        data,
    })
}
