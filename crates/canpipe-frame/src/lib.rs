//! Fixed-size CAN frame wire format shared by the driver and its clients.
//!
//! Every record that crosses the client boundary is exactly [`FRAME_SIZE`]
//! bytes, little-endian:
//! - `Id` (4 bytes), `Type` (4 bytes), `DataLength` (4 bytes)
//! - `Data` (8 bytes, only the first `DataLength` are meaningful)
//!
//! A status record has the same size and is told apart by its first word,
//! which carries identifier bits that no valid frame may use.

pub mod codec;
pub mod error;
pub mod reader;
pub mod status;
pub mod writer;

pub use codec::{
    decode_message, decode_write, encode_message, CanFrame, FrameType, Message, RawRecord,
    StatusRecord, FRAME_SIZE, HEADER_SIZE, MAX_DATA_LENGTH, MAX_EXTENDED_ID, MIN_WRITE_SIZE,
    RESERVED_ID_MASK,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use status::{StatusFlags, STATUS_CHANGE_FLAG};
pub use writer::FrameWriter;
