//! The logical frame envelope carried inside every frame body.
//!
//! Envelope layout (before compression), little-endian:
//!
//! ```text
//! +----------+---------+----------+------------------+
//! | frame id | tag_len | type tag | payload          |
//! | 16 bytes | u16 LE  | UTF-8    | remaining bytes  |
//! +----------+---------+----------+------------------+
//! ```
//!
//! The envelope is itself framed inside the checksummed body, so the field
//! order and presence must remain stable.

use crate::error::FramingError;
use crate::payload::{FramePayload, QueryReplyPayload};
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Sentinel type tag for the raw byte-array fast path. Payload bytes are
/// delivered as-is with no JSON deserialization.
pub const RAW_BYTES_TAG: &str = "byte[]";

/// Fixed portion of the envelope encoding: 16-byte id + 2-byte tag length.
const ENVELOPE_FIXED_SIZE: usize = 18;

/// The logical (id, type tag, payload bytes) record carried inside a frame.
///
/// The id doubles as the correlation key: a reply frame carries the same id
/// as the query it answers, and the id of a sent query is never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEnvelope {
    /// Unique frame id, generated at creation unless copied from a query
    /// being replied to.
    pub id: Uuid,

    /// Type tag identifying the payload type at decode time.
    pub type_tag: String,

    /// Serialized payload bytes (or the raw bytes themselves for the
    /// `"byte[]"` fast path).
    pub payload: Bytes,
}

impl FrameEnvelope {
    /// Creates an envelope with a fresh id around a typed payload.
    pub fn from_payload<T: FramePayload>(value: &T) -> Result<Self, FramingError> {
        Ok(Self {
            id: Uuid::new_v4(),
            type_tag: T::TYPE_TAG.to_string(),
            payload: Bytes::from(serde_json::to_vec(value)?),
        })
    }

    /// Creates an envelope with a fresh id around raw bytes, skipping
    /// payload serialization entirely.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_tag: RAW_BYTES_TAG.to_string(),
            payload: bytes,
        }
    }

    /// Creates a reply envelope. The id is copied from the query frame
    /// being answered, not freshly generated; this is what makes
    /// correlation possible.
    pub fn reply_to<T: QueryReplyPayload>(query_id: Uuid, value: &T) -> Result<Self, FramingError> {
        Ok(Self {
            id: query_id,
            type_tag: T::TYPE_TAG.to_string(),
            payload: Bytes::from(serde_json::to_vec(value)?),
        })
    }

    /// Binary-serializes the envelope.
    pub fn encode(&self) -> Result<BytesMut, FramingError> {
        let tag_len = u16::try_from(self.type_tag.len())
            .map_err(|_| FramingError::MalformedEnvelope("type tag exceeds 65535 bytes"))?;

        let mut buf =
            BytesMut::with_capacity(ENVELOPE_FIXED_SIZE + self.type_tag.len() + self.payload.len());
        buf.put_slice(self.id.as_bytes());
        buf.put_u16_le(tag_len);
        buf.put_slice(self.type_tag.as_bytes());
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes an envelope from a decompressed frame body.
    pub fn decode(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < ENVELOPE_FIXED_SIZE {
            return Err(FramingError::MalformedEnvelope("truncated envelope"));
        }

        // The slice length is checked above, so from_slice cannot fail.
        let id = Uuid::from_slice(&buf[..16])
            .map_err(|_| FramingError::MalformedEnvelope("invalid frame id"))?;

        let tag_len = u16::from_le_bytes([buf[16], buf[17]]) as usize;
        let payload_start = ENVELOPE_FIXED_SIZE + tag_len;
        if buf.len() < payload_start {
            return Err(FramingError::MalformedEnvelope("type tag overruns envelope"));
        }

        let type_tag = std::str::from_utf8(&buf[ENVELOPE_FIXED_SIZE..payload_start])
            .map_err(|_| FramingError::MalformedEnvelope("type tag is not valid UTF-8"))?
            .to_string();

        Ok(Self {
            id,
            type_tag,
            payload: Bytes::copy_from_slice(&buf[payload_start..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestMessage {
        text: String,
    }

    impl FramePayload for TestMessage {
        const TYPE_TAG: &'static str = "test.message";
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = FrameEnvelope::from_payload(&TestMessage {
            text: "hello".to_string(),
        })
        .unwrap();

        let encoded = envelope.encode().unwrap();
        let decoded = FrameEnvelope::decode(&encoded).unwrap();

        assert_eq!(decoded.id, envelope.id);
        assert_eq!(decoded.type_tag, "test.message");
        assert_eq!(decoded.payload, envelope.payload);
    }

    #[test]
    fn test_raw_bytes_envelope() {
        let envelope = FrameEnvelope::from_bytes(Bytes::from_static(b"\x00\x01\x02\xFF"));
        assert_eq!(envelope.type_tag, RAW_BYTES_TAG);

        let encoded = envelope.encode().unwrap();
        let decoded = FrameEnvelope::decode(&encoded).unwrap();
        assert_eq!(decoded.payload.as_ref(), b"\x00\x01\x02\xFF");
    }

    #[test]
    fn test_reply_copies_query_id() {
        #[derive(Debug, Serialize, Deserialize)]
        struct TestReply {
            ok: bool,
        }
        impl FramePayload for TestReply {
            const TYPE_TAG: &'static str = "test.reply";
        }
        impl QueryReplyPayload for TestReply {}

        let query_id = Uuid::new_v4();
        let reply = FrameEnvelope::reply_to(query_id, &TestReply { ok: true }).unwrap();
        assert_eq!(reply.id, query_id);
    }

    #[test]
    fn test_fresh_ids_are_distinct() {
        let a = FrameEnvelope::from_bytes(Bytes::new());
        let b = FrameEnvelope::from_bytes(Bytes::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_decode_truncated() {
        let result = FrameEnvelope::decode(&[0u8; 17]);
        assert!(matches!(result, Err(FramingError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_tag_overrun() {
        let mut buf = vec![0u8; ENVELOPE_FIXED_SIZE];
        // Claim a 200-byte tag with nothing following.
        buf[16] = 200;
        buf[17] = 0;
        let result = FrameEnvelope::decode(&buf);
        assert!(matches!(result, Err(FramingError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_invalid_utf8_tag() {
        let mut buf = vec![0u8; ENVELOPE_FIXED_SIZE + 2];
        buf[16] = 2;
        buf[18] = 0xFF;
        buf[19] = 0xFE;
        let result = FrameEnvelope::decode(&buf);
        assert!(matches!(result, Err(FramingError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_empty_payload() {
        let envelope = FrameEnvelope::from_bytes(Bytes::new());
        let encoded = envelope.encode().unwrap();
        let decoded = FrameEnvelope::decode(&encoded).unwrap();
        assert!(decoded.payload.is_empty());
    }
}
