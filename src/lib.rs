//! # streamframe
//!
//! A framing layer for ordered byte streams (typically TCP). Stream reads
//! arrive fragmented or coalesced; this crate rebuilds the discrete, typed
//! messages that were originally written, and layers a query/reply
//! correlation mechanism on top of fire-and-forget notifications, all over
//! a single duplex stream.
//!
//! This crate provides:
//! - Binary framing with a fixed delimiter, length prefix, and CRC-16
//!   validation, with resynchronization on stream corruption
//! - Deflate compression and a pluggable encryption hook around frame bodies
//! - Typed payloads with role enforcement (notification / query / reply)
//!   via a registration-based payload registry
//! - Request/response correlation keyed by per-frame UUIDs
//!
//! ## Wire format
//!
//! Every frame on the stream is a 10-byte little-endian header followed by
//! the compressed (and optionally encrypted) body:
//!
//! ```text
//! +-----------+------------+----------+------------------------+
//! | delimiter | gross_size | checksum | body                   |
//! |  i32 LE   |   i32 LE   |  u16 LE  | gross_size - 10 bytes  |
//! +-----------+------------+----------+------------------------+
//! ```
//!
//! `gross_size` counts the header itself; `checksum` is CRC-16/ARC over the
//! body exactly as written (post-compression, post-encryption).

pub mod buffer;
pub mod checksum;
pub mod codec;
pub(crate) mod correlation;
pub mod envelope;
pub mod error;
pub mod payload;
pub mod session;

pub use buffer::FrameBuffer;
pub use codec::{assemble, open_body, EncryptionProvider};
pub use envelope::{FrameEnvelope, RAW_BYTES_TAG};
pub use error::FramingError;
pub use payload::{
    ErrorReply, FramePayload, InboundPayload, NotificationPayload, PayloadRegistry, PayloadRole,
    QueryPayload, QueryReplyPayload, Reply,
};
pub use session::{FrameSession, Handlers, SessionConfig};

/// Fixed magic constant marking the start of every frame.
pub const FRAME_DELIMITER: i32 = 948_724_593;

/// Size of the fixed frame header in bytes (4 + 4 + 2).
pub const FRAME_HEADER_SIZE: usize = 10;

/// Maximum accepted frame size, header included (16 MiB). A header claiming
/// more than this is treated as corruption.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
