//! Binary Wire Codec
//!
//! Primitives shared by the framer, the request handler, and the tests that
//! speak the protocol from the client side. Everything on the wire is
//! big-endian:
//!
//! - `u8` / `i16` / `i32` - fixed width integers
//! - `utf` - `u16` length followed by that many UTF-8 bytes
//! - `key` / `blob` - `i32` length followed by that many raw bytes
//! - versioned-value list - `i32 n`, then per value `i32 total_len` and
//!   `clock_bytes || value_bytes` (the clock's length is self-describing,
//!   which is how the two halves are split back apart)
//!
//! Store names arrive in the peer's modified-UTF-8. This codec decodes
//! strict UTF-8, which agrees with modified UTF-8 for ASCII; non-ASCII store
//! names are not supported.
//!
//! Reading past the provided bounds is a [`WireError::ShortBuffer`]; the
//! framer turns that into "request incomplete" while the handler treats it
//! as a torn frame. A negative length is always malformed.

use bytes::Bytes;

use thiserror::Error;

use crate::buffer::{ByteBuffer, CapacityError};
use crate::versioning::{ClockError, VectorClock, Versioned};

/// Request opcodes, as the peer's opcode table defines them.
pub mod opcode {
    pub const GET: u8 = 0x01;
    pub const GET_ALL: u8 = 0x02;
    pub const PUT: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
}

/// Errors surfaced by the codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A read would pass the end of the provided bytes.
    #[error("short buffer: need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },

    /// A length prefix was negative.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// A `utf` field was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A `utf` field too long for its `u16` length prefix.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    /// A key or blob too long for its `i32` length prefix.
    #[error("field of {0} bytes exceeds the i32 length prefix")]
    FieldTooLong(usize),

    /// An embedded vector clock failed to decode.
    #[error("bad vector clock: {0}")]
    Clock(#[from] ClockError),

    /// A write ran past the output buffer's fixed capacity.
    #[error(transparent)]
    Overflow(#[from] CapacityError),
}

/// Result alias for codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// A cursor over a byte slice with typed, bounds-checked reads.
///
/// Reads never consume past the slice; a failed read leaves the cursor
/// where the failing field began.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Wraps `buf` with the cursor at zero.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError::ShortBuffer {
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> WireResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> WireResult<&'a [u8]> {
        self.take(n)
    }

    /// Advances the cursor by `n` without looking at the bytes.
    pub fn skip(&mut self, n: usize) -> WireResult<()> {
        self.take(n).map(|_| ())
    }

    /// Reads a `u16`-length-prefixed UTF-8 string.
    pub fn read_utf(&mut self) -> WireResult<&'a str> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
    }

    /// Skips over a `utf` field without validating its contents.
    pub fn skip_utf(&mut self) -> WireResult<()> {
        let len = self.read_u16()? as usize;
        self.skip(len)
    }

    fn read_i32_len(&mut self) -> WireResult<usize> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(WireError::NegativeLength(len));
        }
        Ok(len as usize)
    }

    /// Reads an `i32`-length-prefixed key.
    pub fn read_key(&mut self) -> WireResult<Bytes> {
        let len = self.read_i32_len()?;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    /// Skips over a key without copying it.
    pub fn skip_key(&mut self) -> WireResult<()> {
        let len = self.read_i32_len()?;
        self.skip(len)
    }

    /// Reads an `i32`-length-prefixed blob.
    pub fn read_blob(&mut self) -> WireResult<Bytes> {
        self.read_key()
    }

    /// Reads a versioned-value list: `i32 n`, then per value an `i32`
    /// total length and the concatenated `clock_bytes || value_bytes`.
    pub fn read_versioned_list(&mut self) -> WireResult<Vec<Versioned>> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(WireError::NegativeLength(count));
        }
        let mut out = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let total = self.read_i32_len()?;
            let blob = self.take(total)?;
            let clock = VectorClock::from_bytes(blob)?;
            let value = Bytes::copy_from_slice(&blob[clock.size_in_bytes()..]);
            out.push(Versioned::new(clock, value));
        }
        Ok(out)
    }
}

/// Typed, bounds-checked appends into a fixed-capacity [`ByteBuffer`].
#[derive(Debug)]
pub struct WireWriter<'a> {
    buf: &'a mut ByteBuffer,
}

impl<'a> WireWriter<'a> {
    /// Wraps the buffer; appends land after its write cursor.
    pub fn new(buf: &'a mut ByteBuffer) -> Self {
        Self { buf }
    }

    pub fn put_u8(&mut self, v: u8) -> WireResult<()> {
        Ok(self.buf.put_slice(&[v])?)
    }

    pub fn put_i16(&mut self, v: i16) -> WireResult<()> {
        Ok(self.buf.put_slice(&v.to_be_bytes())?)
    }

    pub fn put_u16(&mut self, v: u16) -> WireResult<()> {
        Ok(self.buf.put_slice(&v.to_be_bytes())?)
    }

    pub fn put_i32(&mut self, v: i32) -> WireResult<()> {
        Ok(self.buf.put_slice(&v.to_be_bytes())?)
    }

    /// Appends raw bytes with no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> WireResult<()> {
        Ok(self.buf.put_slice(bytes)?)
    }

    /// Appends a `u16`-length-prefixed UTF-8 string.
    pub fn put_utf(&mut self, s: &str) -> WireResult<()> {
        let len = s.len();
        if len > u16::MAX as usize {
            return Err(WireError::StringTooLong(len));
        }
        self.put_u16(len as u16)?;
        self.put_bytes(s.as_bytes())
    }

    fn put_i32_len(&mut self, len: usize) -> WireResult<()> {
        if len > i32::MAX as usize {
            return Err(WireError::FieldTooLong(len));
        }
        self.put_i32(len as i32)
    }

    /// Appends an `i32`-length-prefixed key or blob.
    pub fn put_key(&mut self, key: &[u8]) -> WireResult<()> {
        self.put_i32_len(key.len())?;
        self.put_bytes(key)
    }

    /// Appends a versioned-value list in the format
    /// [`WireReader::read_versioned_list`] decodes.
    pub fn put_versioned_list(&mut self, values: &[Versioned]) -> WireResult<()> {
        self.put_i32_len(values.len())?;
        for versioned in values {
            let clock_bytes = versioned.clock().to_bytes();
            self.put_i32_len(clock_bytes.len() + versioned.value().len())?;
            self.put_bytes(&clock_bytes)?;
            self.put_bytes(versioned.value())?;
        }
        Ok(())
    }
}
