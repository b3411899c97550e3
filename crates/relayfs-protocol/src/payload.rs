//! Payload primitives.
//!
//! Integers are little-endian; strings are an `i32` byte count followed
//! by UTF-8; timestamps are `i64` nanoseconds relative to the Unix epoch;
//! booleans are one byte.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Builds a payload.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(value as u8)
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    /// Length-prefixed UTF-8.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        // Frames are capped far below i32::MAX, so the length always fits.
        self.put_i32(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// UTF-8 with no length prefix; only valid as the last field.
    pub fn put_rest(&mut self, value: &str) -> &mut Self {
        self.buf.put_slice(value.as_bytes());
        self
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    /// Nanoseconds since the Unix epoch, negative before it. Saturates.
    pub fn put_time(&mut self, value: SystemTime) -> &mut Self {
        let nanos = match value.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
            Err(before) => i64::try_from(before.duration().as_nanos())
                .map(|n| -n)
                .unwrap_or(i64::MIN),
        };
        self.put_i64(nanos)
    }

    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// Consumes a payload front to back.
#[derive(Debug, Clone)]
pub struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, needed: usize) -> ProtocolResult<()> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> ProtocolResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> ProtocolResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::invalid("boolean", other)),
        }
    }

    pub fn i32(&mut self) -> ProtocolResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u32(&mut self) -> ProtocolResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i64(&mut self) -> ProtocolResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn string(&mut self) -> ProtocolResult<String> {
        let len = self.i32()?;
        let len = usize::try_from(len).map_err(|_| ProtocolError::NegativeLength(len))?;
        self.need(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Everything left, as UTF-8.
    pub fn rest_string(&mut self) -> ProtocolResult<String> {
        let raw = self.buf.split_to(self.buf.remaining());
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn time(&mut self) -> ProtocolResult<SystemTime> {
        let nanos = self.i64()?;
        let magnitude = Duration::from_nanos(nanos.unsigned_abs());
        let time = if nanos >= 0 {
            UNIX_EPOCH.checked_add(magnitude)
        } else {
            UNIX_EPOCH.checked_sub(magnitude)
        };
        time.ok_or_else(|| ProtocolError::invalid("timestamp", nanos))
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fail if anything is left over.
    pub fn finish(self) -> ProtocolResult<()> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian_with_length_prefix() {
        let mut w = PayloadWriter::new();
        w.put_i32(1).put_string("ab").put_bool(true);
        let bytes = w.finish();
        assert_eq!(&bytes[..], &[1, 0, 0, 0, 2, 0, 0, 0, b'a', b'b', 1]);
    }

    #[test]
    fn test_times_before_and_after_epoch() {
        let before = UNIX_EPOCH - Duration::from_secs(3600);
        let after = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789);
        let mut w = PayloadWriter::new();
        w.put_time(before).put_time(after);
        let mut r = PayloadReader::new(w.finish());
        assert_eq!(r.time().unwrap(), before);
        assert_eq!(r.time().unwrap(), after);
        r.finish().unwrap();
    }

    #[test]
    fn test_truncated_string() {
        let mut w = PayloadWriter::new();
        w.put_i32(10).put_bytes(b"abc");
        let err = PayloadReader::new(w.finish()).string().unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 10, remaining: 3 }));
    }

    #[test]
    fn test_negative_string_length() {
        let mut w = PayloadWriter::new();
        w.put_i32(-1);
        let err = PayloadReader::new(w.finish()).string().unwrap_err();
        assert!(matches!(err, ProtocolError::NegativeLength(-1)));
    }

    #[test]
    fn test_invalid_utf8_and_trailing() {
        let mut w = PayloadWriter::new();
        w.put_i32(1).put_bytes(&[0xff]);
        assert!(matches!(
            PayloadReader::new(w.finish()).string(),
            Err(ProtocolError::InvalidUtf8)
        ));

        let r = PayloadReader::new(Bytes::from_static(b"xy"));
        assert!(matches!(r.finish(), Err(ProtocolError::TrailingBytes(2))));
    }

    #[test]
    fn test_bool_rejects_other_bytes() {
        let mut r = PayloadReader::new(Bytes::from_static(&[2]));
        assert!(matches!(r.bool(), Err(ProtocolError::InvalidValue { .. })));
    }
}
