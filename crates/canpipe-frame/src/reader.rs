use std::io::{ErrorKind, Read};

use crate::codec::{decode_message, Message, RawRecord, FRAME_SIZE};
use crate::error::{FrameError, Result};

/// Reads back-to-back fixed-size records from any `Read` stream.
///
/// Handles partial reads internally. Callers always get complete records.
pub struct FrameReader<T> {
    inner: T,
    buf: RawRecord,
    filled: usize,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: [0u8; FRAME_SIZE],
            filled: 0,
        }
    }

    /// Read the next complete raw record (blocking).
    ///
    /// Returns `Ok(None)` on a clean end of stream at a record boundary and
    /// `Err(FrameError::ConnectionClosed)` if the stream ends mid-record.
    pub fn read_record(&mut self) -> Result<Option<RawRecord>> {
        while self.filled < FRAME_SIZE {
            let read = match self.inner.read(&mut self.buf[self.filled..]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.filled == 0 {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionClosed);
            }
            self.filled += read;
        }

        self.filled = 0;
        Ok(Some(self.buf))
    }

    /// Read and decode the next record.
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        match self.read_record()? {
            Some(record) => decode_message(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Iterator for FrameReader<T> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_message().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::{CanFrame, StatusRecord};
    use crate::status::StatusFlags;

    #[test]
    fn read_multiple_records() {
        let a = CanFrame::standard(0x10, b"one");
        let b = StatusRecord::new(StatusFlags::CRC_ERR);
        let c = CanFrame::extended(0x1000, b"three");

        let mut wire = Vec::new();
        wire.extend_from_slice(&a.to_record());
        wire.extend_from_slice(&b.to_record());
        wire.extend_from_slice(&c.to_record());

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_message().unwrap(), Some(Message::Frame(a)));
        assert_eq!(reader.read_message().unwrap(), Some(Message::Status(b)));
        assert_eq!(reader.read_message().unwrap(), Some(Message::Frame(c)));
        assert_eq!(reader.read_message().unwrap(), None);
    }

    #[test]
    fn partial_read_handling() {
        let frame = CanFrame::standard(4, b"slow");
        let byte_reader = ByteByByteReader {
            bytes: frame.to_record().to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        assert_eq!(reader.read_message().unwrap(), Some(Message::Frame(frame)));
    }

    #[test]
    fn stream_closed_mid_record() {
        let record = CanFrame::standard(2, b"part").to_record();
        let mut reader = FrameReader::new(Cursor::new(record[..7].to_vec()));
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn interrupted_read_retries() {
        let frame = CanFrame::standard(8, b"ok");
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(frame.to_record().to_vec()),
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_message().unwrap(), Some(Message::Frame(frame)));
    }

    #[test]
    fn iterator_stops_at_end() {
        let mut wire = Vec::new();
        for id in 0..3u32 {
            wire.extend_from_slice(&CanFrame::standard(id, &[id as u8]).to_record());
        }
        let ids: Vec<u32> = FrameReader::new(Cursor::new(wire))
            .map(|msg| match msg.unwrap() {
                Message::Frame(frame) => frame.id,
                Message::Status(_) => u32::MAX,
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
