//! # Shared Wire Protocol
//!
//! Everything both the world server and its clients must agree on: the
//! little-endian byte encoding, the length-prefixed frame format, and the
//! typed packet schemas.
//!
//! ## Layers
//!
//! - [`wire`]: primitive reads and writes (LE integers, f32, LEB128 strings)
//! - [`codec`]: frame accumulation over the TCP byte stream
//! - [`protocol`]: typed [`Packet`](protocol::Packet)s with fixed per-id schemas
//!
//! A frame on the wire is `[u32 LE length][body]`; a body is
//! `[u16 LE packet id][fields...]`. Frames are capped at 1 MiB. Strings are
//! UTF-8 with an unsigned LEB128 byte-length prefix, the one encoding every
//! peer uses.

pub mod codec;
pub mod protocol;
pub mod wire;

pub use codec::{frame, FrameCodec, FrameError, MAX_FRAME_LEN};
pub use protocol::{ObjectKind, Packet, SnapshotEntry};
pub use wire::{ByteReader, ByteWriter, WireError};
