//! Length-prefixed frame accumulation for TCP streams.
//!
//! Every packet on the wire is a frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   body             |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The prefix does not include its own 4 bytes. TCP delivers a byte stream,
//! so frames may arrive split or coalesced arbitrarily; [`FrameCodec`]
//! reassembles them. One codec instance exists per session.

/// Hard cap on a single frame body. A peer announcing more than this is
/// treated as broken and must be disconnected.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors surfaced while extracting frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A length prefix exceeded [`MAX_FRAME_LEN`]. The accumulator has been
    /// reset; the session must be disconnected.
    #[error("frame length {len} exceeds maximum {max}")]
    Oversize {
        /// The announced body length.
        len: u64,
        /// The configured cap.
        max: usize,
    },
}

/// Reassembles length-prefixed frames from an arbitrary byte stream.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends raw bytes read from the socket.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered (incomplete frame data).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extracts every complete frame body accumulated so far, in order.
    ///
    /// Partial trailing data stays buffered for the next call. An oversize
    /// length resets the buffer and returns an error; the connection cannot
    /// be resynchronized after that.
    pub fn extract(&mut self) -> Result<Vec<Vec<u8>>, FrameError> {
        let mut frames = Vec::new();
        let mut offset = 0usize;

        loop {
            let avail = self.buf.len() - offset;
            if avail < 4 {
                break;
            }
            let len = u32::from_le_bytes([
                self.buf[offset],
                self.buf[offset + 1],
                self.buf[offset + 2],
                self.buf[offset + 3],
            ]) as usize;

            if len > MAX_FRAME_LEN {
                self.buf.clear();
                return Err(FrameError::Oversize {
                    len: len as u64,
                    max: MAX_FRAME_LEN,
                });
            }
            if avail < 4 + len {
                break;
            }
            frames.push(self.buf[offset + 4..offset + 4 + len].to_vec());
            offset += 4 + len;
        }

        if offset > 0 {
            self.buf.drain(..offset);
        }
        Ok(frames)
    }
}

/// Prepends the 4-byte little-endian length prefix to a body, producing the
/// exact bytes a writer puts on the socket.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_extraction() {
        let mut codec = FrameCodec::new();
        codec.append(&frame(b"hello"));
        let frames = codec.extract().unwrap();
        assert_eq!(frames, vec![b"hello".to_vec()]);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let mut codec = FrameCodec::new();
        let wire = frame(b"abcdef");
        codec.append(&wire[..7]);
        assert!(codec.extract().unwrap().is_empty());
        codec.append(&wire[7..]);
        assert_eq!(codec.extract().unwrap(), vec![b"abcdef".to_vec()]);
    }

    #[test]
    fn test_coalesced_frames_extract_in_order() {
        let mut codec = FrameCodec::new();
        let mut wire = frame(b"one");
        wire.extend_from_slice(&frame(b"two"));
        wire.extend_from_slice(&frame(b"three"));
        codec.append(&wire);
        let frames = codec.extract().unwrap();
        assert_eq!(
            frames,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let mut codec = FrameCodec::new();
        let mut wire = frame(b"split");
        wire.extend_from_slice(&frame(b"up"));
        let mut collected = Vec::new();
        for b in wire {
            codec.append(&[b]);
            collected.extend(codec.extract().unwrap());
        }
        assert_eq!(collected, vec![b"split".to_vec(), b"up".to_vec()]);
    }

    #[test]
    fn test_empty_body_frame() {
        let mut codec = FrameCodec::new();
        codec.append(&frame(b""));
        let frames = codec.extract().unwrap();
        assert_eq!(frames, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_oversize_length_resets_buffer() {
        let mut codec = FrameCodec::new();
        codec.append(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());
        codec.append(b"garbage");
        let err = codec.extract().unwrap_err();
        assert!(matches!(err, FrameError::Oversize { .. }));
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_negative_length_is_oversize() {
        // i32 -1 on the wire reads as u32::MAX.
        let mut codec = FrameCodec::new();
        codec.append(&(-1i32).to_le_bytes());
        assert!(matches!(
            codec.extract(),
            Err(FrameError::Oversize { .. })
        ));
    }

    #[test]
    fn test_arbitrary_split_points_yield_each_frame_once() {
        let bodies: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; i as usize + 1]).collect();
        let mut wire = Vec::new();
        for b in &bodies {
            wire.extend_from_slice(&frame(b));
        }
        // Split the stream at every third byte.
        for chunk_len in 1..6 {
            let mut codec = FrameCodec::new();
            let mut collected = Vec::new();
            for chunk in wire.chunks(chunk_len) {
                codec.append(chunk);
                collected.extend(codec.extract().unwrap());
            }
            assert_eq!(collected, bodies, "chunk_len={}", chunk_len);
        }
    }
}
