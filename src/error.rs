//! Framing error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by framing operations.
///
/// Framing-level corruption (bad delimiter, bad checksum) never appears
/// here: it is recovered locally by resynchronization and treated as noise
/// on an unreliable stream. Everything below is unrecoverable for the
/// current operation and is returned to the caller; nothing is retried
/// internally.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("not connected")]
    NotConnected,

    #[error("query timeout expired while waiting on reply")]
    QueryTimeout,

    #[error("query waiter was released without a reply payload")]
    NullReply,

    #[error("query failed on the remote peer: {0}")]
    QueryFailed(String),

    #[error("a notification frame arrived but no notification handler was supplied")]
    MissingNotificationHandler,

    #[error("a query frame arrived but no query handler was supplied")]
    MissingQueryHandler,

    #[error("no pending query matches reply id {0}")]
    UnmatchedReply(Uuid),

    #[error("unknown payload type tag: {0}")]
    UnknownPayloadType(String),

    #[error("reply payload was not of the expected type")]
    UnexpectedReplyType,

    #[error("malformed frame envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("body decompression failed: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
