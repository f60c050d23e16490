//! Typed payloads, role enforcement, and the payload registry.
//!
//! Every value sent through the framing layer is tagged at the type level
//! as exactly one of three roles: notification (fire-and-forget), query
//! (expects a reply), or query reply. The role determines how an inbound
//! frame is dispatched.
//!
//! Inbound decoding goes through a [`PayloadRegistry`]: a per-session map
//! from a stable string tag to the payload's role and deserialization
//! function, populated by explicit registration calls at startup. There is
//! no runtime type-name lookup; a tag that was never registered fails with
//! [`FramingError::UnknownPayloadType`].

use crate::envelope::{FrameEnvelope, RAW_BYTES_TAG};
use crate::error::FramingError;
use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// A payload that can travel inside a frame envelope.
///
/// `TYPE_TAG` is the stable wire identifier for the type; both peers must
/// register the same tag for the same shape.
pub trait FramePayload: Serialize + DeserializeOwned + Send + 'static {
    /// Stable wire tag identifying this payload type.
    const TYPE_TAG: &'static str;
}

/// Marker for payloads sent as fire-and-forget notifications.
pub trait NotificationPayload: FramePayload {}

/// Marker for payloads sent as queries. Every query frame is answered by
/// exactly one reply frame carrying the same id.
pub trait QueryPayload: FramePayload {}

/// Marker for payloads sent in reply to a query.
pub trait QueryReplyPayload: FramePayload {}

/// Dispatch role of a registered payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRole {
    Notification,
    Query,
    Reply,
}

/// A decoded inbound payload, type-erased for handler dispatch.
///
/// Handlers inspect it with [`is`](Self::is) / [`downcast`](Self::downcast),
/// mirroring how an application matches on the concrete message types it
/// registered. The raw-bytes fast path arrives as a [`Bytes`] value under
/// the [`RAW_BYTES_TAG`] tag.
pub struct InboundPayload {
    type_tag: String,
    value: Box<dyn Any + Send>,
}

impl InboundPayload {
    pub(crate) fn new(type_tag: impl Into<String>, value: Box<dyn Any + Send>) -> Self {
        Self {
            type_tag: type_tag.into(),
            value,
        }
    }

    /// The wire tag this payload arrived under.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Returns whether the payload is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Attempts to take the payload as a `T`, handing it back on mismatch.
    pub fn downcast<T: 'static>(self) -> Result<Box<T>, Self> {
        let Self { type_tag, value } = self;
        value
            .downcast::<T>()
            .map_err(|value| Self { type_tag, value })
    }

    /// Borrows the payload as a `T` if it is one.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for InboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundPayload")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// A serialized reply produced by a query handler.
pub struct Reply {
    pub(crate) type_tag: &'static str,
    pub(crate) payload: Bytes,
}

impl Reply {
    /// Serializes a reply payload for the session to send back under the
    /// query frame's id.
    pub fn new<T: QueryReplyPayload>(value: &T) -> Result<Self, FramingError> {
        Ok(Self {
            type_tag: T::TYPE_TAG,
            payload: Bytes::from(serde_json::to_vec(value)?),
        })
    }
}

/// Built-in reply payload carrying a query failure back to the caller.
///
/// A query handler that returns an error produces one of these on the wire;
/// the peer's pending `write_query` then fails with
/// [`FramingError::QueryFailed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub message: String,
}

impl FramePayload for ErrorReply {
    const TYPE_TAG: &'static str = "streamframe.error-reply";
}

impl QueryReplyPayload for ErrorReply {}

type DecodeFn = Arc<dyn Fn(&str, &[u8]) -> Result<InboundPayload, FramingError> + Send + Sync>;

struct RegistryEntry {
    role: PayloadRole,
    decode: DecodeFn,
}

/// Per-session registry mapping payload type tags to roles and
/// deserializers.
///
/// Registered ahead of time by the application; lookups during frame
/// dispatch are lock-free reads. Registering the same tag twice replaces
/// the earlier entry.
pub struct PayloadRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl PayloadRegistry {
    /// Creates a registry with the built-in [`ErrorReply`] type
    /// pre-registered.
    pub fn new() -> Self {
        let registry = Self {
            entries: DashMap::new(),
        };
        registry.register_reply::<ErrorReply>();
        registry
    }

    fn register<T: FramePayload>(&self, role: PayloadRole) {
        fn decode_json<T: FramePayload>(
            tag: &str,
            bytes: &[u8],
        ) -> Result<InboundPayload, FramingError> {
            let value: T = serde_json::from_slice(bytes)?;
            Ok(InboundPayload::new(tag, Box::new(value)))
        }

        let decode: DecodeFn = Arc::new(decode_json::<T>);
        self.entries
            .insert(T::TYPE_TAG.to_string(), RegistryEntry { role, decode });
    }

    /// Registers `T` as a notification payload.
    pub fn register_notification<T: NotificationPayload>(&self) {
        self.register::<T>(PayloadRole::Notification);
    }

    /// Registers `T` as a query payload.
    pub fn register_query<T: QueryPayload>(&self) {
        self.register::<T>(PayloadRole::Query);
    }

    /// Registers `T` as a query reply payload.
    pub fn register_reply<T: QueryReplyPayload>(&self) {
        self.register::<T>(PayloadRole::Reply);
    }

    /// Decodes an envelope's payload and classifies its dispatch role.
    ///
    /// The `"byte[]"` fast path is checked first and needs no registration:
    /// it is delivered as a [`Bytes`] notification with no deserialization.
    pub(crate) fn decode(
        &self,
        envelope: &FrameEnvelope,
    ) -> Result<(PayloadRole, InboundPayload), FramingError> {
        if envelope.type_tag == RAW_BYTES_TAG {
            let payload = InboundPayload::new(RAW_BYTES_TAG, Box::new(envelope.payload.clone()));
            return Ok((PayloadRole::Notification, payload));
        }

        let (role, decode) = {
            let entry = self
                .entries
                .get(&envelope.type_tag)
                .ok_or_else(|| FramingError::UnknownPayloadType(envelope.type_tag.clone()))?;
            (entry.role, Arc::clone(&entry.decode))
        };

        let payload = decode(&envelope.type_tag, &envelope.payload)?;
        Ok((role, payload))
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
