//! Little-endian byte-level reader and writer for packet bodies.
//!
//! Every multi-byte integer and float on the wire is little-endian. Strings
//! are encoded as an unsigned LEB128 byte-length prefix followed by UTF-8
//! bytes; this is the single string encoding both peers must use.

/// Errors produced while decoding a packet body.
///
/// Decoders are total: any malformed input maps to one of these variants,
/// never a panic.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The body ended before the requested field could be read.
    #[error("unexpected end of packet body at offset {offset}")]
    UnexpectedEnd {
        /// Cursor position when the read was attempted.
        offset: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A string length prefix was overlong or exceeded the frame cap.
    #[error("string length prefix invalid or too large ({len} bytes)")]
    BadStringLength {
        /// The decoded (or partially decoded) length.
        len: u64,
    },

    /// The packet id is not part of the protocol.
    #[error("unknown packet id {id}")]
    UnknownPacketId {
        /// The offending id.
        id: u16,
    },

    /// A tag byte (object kind, flags) held a value outside its domain.
    #[error("invalid tag value {value} for {field}")]
    InvalidTag {
        /// Name of the field being decoded.
        field: &'static str,
        /// The offending value.
        value: u8,
    },
}

/// Longest string body we will accept; matches the frame hard cap so a
/// string can never promise more bytes than a frame can carry.
const MAX_STRING_LEN: u64 = 1024 * 1024;

/// Append-only writer assembling a packet body.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Consumes the writer and returns the assembled body.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes an unsigned LEB128 length prefix followed by UTF-8 bytes.
    pub fn put_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let mut len = bytes.len() as u64;
        loop {
            let mut byte = (len & 0x7f) as u8;
            len >>= 7;
            if len != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if len == 0 {
                break;
            }
        }
        self.buf.extend_from_slice(bytes);
    }
}

/// Cursor over a packet body slice with total, checked reads.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of unread bytes remaining.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEnd { offset: self.pos });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads an unsigned LEB128 length prefix followed by UTF-8 bytes.
    pub fn get_string(&mut self) -> Result<String, WireError> {
        let mut len: u64 = 0;
        let mut shift = 0u32;
        loop {
            // 5 groups of 7 bits cover every length we accept.
            if shift >= 35 {
                return Err(WireError::BadStringLength { len });
            }
            let byte = self.get_u8()?;
            len |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        if len > MAX_STRING_LEN {
            return Err(WireError::BadStringLength { len });
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}
