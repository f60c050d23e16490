//! Framing session: the per-connection engine.
//!
//! A [`FrameSession`] wraps one duplex byte stream and owns everything the
//! framing layer needs for that connection: the split read/write halves,
//! the reassembly buffer, the payload registry, and the table of queries
//! awaiting replies. Nothing is process-global; two sessions never share
//! correlation state.
//!
//! One task loops on [`FrameSession::read_and_process`] (or
//! [`FrameSession::run`]) per stream; any number of other tasks may call
//! the `write_*` operations concurrently. The writer half sits behind a
//! lock so each assembled frame reaches the wire as one contiguous unit.

use crate::buffer::{FrameBuffer, DEFAULT_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE, MIN_READ_BUFFER_SIZE};
use crate::codec::{self, EncryptionProvider};
use crate::correlation::PendingQueries;
use crate::envelope::FrameEnvelope;
use crate::error::FramingError;
use crate::payload::{
    ErrorReply, InboundPayload, NotificationPayload, PayloadRegistry, PayloadRole, QueryPayload,
    QueryReplyPayload, Reply,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Size of the buffer each stream read lands in.
    pub read_buffer_size: usize,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

type NotificationFn = Box<dyn Fn(InboundPayload) + Send + Sync>;
type QueryFn = Box<dyn Fn(InboundPayload) -> Result<Reply, FramingError> + Send + Sync>;

/// Inbound dispatch callbacks for a session's read loop.
///
/// Both callbacks are optional, but a frame arriving for an absent handler
/// is a protocol-usage error: [`FramingError::MissingNotificationHandler`]
/// or [`FramingError::MissingQueryHandler`].
#[derive(Default)]
pub struct Handlers {
    notification: Option<NotificationFn>,
    query: Option<QueryFn>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback invoked for each notification payload.
    pub fn on_notification(
        mut self,
        f: impl Fn(InboundPayload) + Send + Sync + 'static,
    ) -> Self {
        self.notification = Some(Box::new(f));
        self
    }

    /// Sets the callback invoked for each query payload. The returned
    /// [`Reply`] is written back immediately under the query frame's id; an
    /// `Err` is forwarded to the peer as an [`ErrorReply`].
    pub fn on_query(
        mut self,
        f: impl Fn(InboundPayload) -> Result<Reply, FramingError> + Send + Sync + 'static,
    ) -> Self {
        self.query = Some(Box::new(f));
        self
    }
}

/// A framing session over one duplex byte stream.
pub struct FrameSession<S> {
    /// Read half of the stream; taken by `close`.
    reader: Mutex<Option<ReadHalf<S>>>,
    /// Write half of the stream. The lock makes assemble+write atomic per
    /// frame across concurrent writers.
    writer: Mutex<Option<WriteHalf<S>>>,
    /// Reassembly state, touched only by the reading task.
    buffer: Mutex<FrameBuffer>,
    /// Queries awaiting replies, keyed by frame id.
    pending: PendingQueries,
    /// Payload type registry shared with the application.
    registry: Arc<PayloadRegistry>,
    /// Optional hook applied around compression on both directions.
    crypto: Option<Arc<dyn EncryptionProvider>>,
    /// Set by `close`; the reading task observes it when its in-flight
    /// read completes and drops the reader half itself.
    closed: AtomicBool,
}

impl<S: AsyncRead + AsyncWrite> FrameSession<S> {
    /// Creates a session over `stream`.
    pub fn new(stream: S, registry: Arc<PayloadRegistry>, config: SessionConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Some(read_half)),
            writer: Mutex::new(Some(write_half)),
            buffer: Mutex::new(FrameBuffer::with_read_buffer_size(config.read_buffer_size)),
            pending: PendingQueries::new(),
            registry,
            crypto: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Installs an encryption hook. Must be configured identically on both
    /// peers before any frames are exchanged.
    pub fn with_encryption(mut self, provider: Arc<dyn EncryptionProvider>) -> Self {
        self.crypto = Some(provider);
        self
    }

    fn crypto(&self) -> Option<&dyn EncryptionProvider> {
        self.crypto.as_deref()
    }

    /// Assembles and writes one frame as a single atomic unit.
    async fn write_envelope(&self, envelope: &FrameEnvelope) -> Result<(), FramingError> {
        let bytes = codec::assemble(envelope, self.crypto())?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(FramingError::NotConnected)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Sends a fire-and-forget notification. No reply is expected.
    pub async fn write_notification<T: NotificationPayload>(
        &self,
        payload: &T,
    ) -> Result<(), FramingError> {
        let envelope = FrameEnvelope::from_payload(payload)?;
        tracing::debug!(id = %envelope.id, tag = T::TYPE_TAG, "sending notification");
        self.write_envelope(&envelope).await
    }

    /// Sends raw bytes as a notification, skipping payload serialization.
    /// The peer receives them as a [`Bytes`] value in its notification
    /// handler.
    pub async fn write_bytes(&self, bytes: Bytes) -> Result<(), FramingError> {
        let envelope = FrameEnvelope::from_bytes(bytes);
        tracing::debug!(id = %envelope.id, len = envelope.payload.len(), "sending raw bytes");
        self.write_envelope(&envelope).await
    }

    /// Sends a query and waits for its reply.
    ///
    /// The waiter is registered under the frame's id before the frame is
    /// written, so a reply can never arrive ahead of it. `None` waits
    /// indefinitely. On timeout the waiter is removed under the same lock
    /// the reading task resolves replies with, so a late reply finds no
    /// waiter and is dropped by the dispatcher.
    pub async fn write_query<Q, R>(
        &self,
        payload: &Q,
        timeout: Option<Duration>,
    ) -> Result<R, FramingError>
    where
        Q: QueryPayload,
        R: QueryReplyPayload,
    {
        let envelope = FrameEnvelope::from_payload(payload)?;
        let id = envelope.id;
        tracing::debug!(%id, tag = Q::TYPE_TAG, "sending query");

        let rx = self.pending.register(id);
        if let Err(e) = self.write_envelope(&envelope).await {
            self.pending.remove(id);
            return Err(e);
        }

        let received = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::debug!(%id, "query timed out");
                    self.pending.remove(id);
                    return Err(FramingError::QueryTimeout);
                }
            },
            None => rx.await,
        };

        let reply = received.map_err(|_| FramingError::NullReply)?;
        match reply.downcast::<R>() {
            Ok(value) => Ok(*value),
            Err(other) => match other.downcast::<ErrorReply>() {
                Ok(err) => Err(FramingError::QueryFailed(err.message)),
                Err(_) => Err(FramingError::UnexpectedReplyType),
            },
        }
    }

    /// Sends a reply to a received query frame. The envelope id is copied
    /// from `reply_to`, never freshly generated.
    pub async fn write_reply<T: QueryReplyPayload>(
        &self,
        reply_to: Uuid,
        payload: &T,
    ) -> Result<(), FramingError> {
        let envelope = FrameEnvelope::reply_to(reply_to, payload)?;
        tracing::debug!(id = %envelope.id, tag = T::TYPE_TAG, "sending reply");
        self.write_envelope(&envelope).await
    }

    /// Performs one stream read and dispatches every complete frame it
    /// resolves.
    ///
    /// Returns `Ok(false)` when the peer disconnected cleanly (a zero-byte
    /// read); mid-read I/O failures surface as [`FramingError::Io`]. This
    /// is the single polling primitive the reading task loops on.
    pub async fn read_and_process(&self, handlers: &Handlers) -> Result<bool, FramingError> {
        let mut buffer = self.buffer.lock().await;

        let n = {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(FramingError::NotConnected)?;
            let n = reader.read(buffer.scratch()).await?;
            if self.closed.load(Ordering::SeqCst) {
                // `close` ran while this read was in flight; drop the
                // reader half here and end the loop cleanly.
                guard.take();
                return Ok(false);
            }
            n
        };

        if n == 0 {
            tracing::debug!("stream returned 0 bytes, peer disconnected");
            return Ok(false);
        }

        tracing::debug!(bytes = n, "read from stream");
        buffer.commit_scratch(n);

        while let Some(body) = buffer.next_body() {
            let envelope = codec::open_body(&body, self.crypto())?;
            self.dispatch(envelope, handlers).await?;
        }

        Ok(true)
    }

    /// Loops on [`read_and_process`](Self::read_and_process) until the
    /// peer disconnects or an error surfaces.
    pub async fn run(&self, handlers: &Handlers) -> Result<(), FramingError> {
        while self.read_and_process(handlers).await? {}
        Ok(())
    }

    /// Routes one decoded frame by its payload role.
    async fn dispatch(
        &self,
        envelope: FrameEnvelope,
        handlers: &Handlers,
    ) -> Result<(), FramingError> {
        let (role, payload) = self.registry.decode(&envelope)?;
        tracing::debug!(id = %envelope.id, tag = %envelope.type_tag, ?role, "dispatching frame");

        match role {
            PayloadRole::Notification => {
                let handler = handlers
                    .notification
                    .as_ref()
                    .ok_or(FramingError::MissingNotificationHandler)?;
                handler(payload);
            }
            PayloadRole::Query => {
                let handler = handlers
                    .query
                    .as_ref()
                    .ok_or(FramingError::MissingQueryHandler)?;
                match handler(payload) {
                    Ok(reply) => {
                        let reply_envelope = FrameEnvelope {
                            id: envelope.id,
                            type_tag: reply.type_tag.to_string(),
                            payload: reply.payload,
                        };
                        self.write_envelope(&reply_envelope).await?;
                    }
                    Err(e) => {
                        tracing::warn!(id = %envelope.id, "query handler failed: {e}");
                        self.write_reply(envelope.id, &ErrorReply {
                            message: e.to_string(),
                        })
                        .await?;
                    }
                }
            }
            PayloadRole::Reply => {
                // A reply without a matching waiter means the caller already
                // timed out; it is logged and dropped, not surfaced.
                if let Err(e) = self.pending.complete(envelope.id, payload) {
                    tracing::warn!(id = %envelope.id, "dropping reply: {e}");
                }
            }
        }

        Ok(())
    }

    /// Number of queries currently awaiting replies.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Shuts the stream down and abandons in-flight queries; their callers
    /// fail with [`FramingError::NullReply`]. Subsequent operations fail
    /// with [`FramingError::NotConnected`].
    ///
    /// A reading task may be parked inside [`read_and_process`](Self::read_and_process)
    /// holding the reader half across its stream read. `close` does not
    /// wait for that read: it sets a flag the task observes when the read
    /// completes, at which point the task drops the reader and its loop
    /// ends with `Ok(false)`.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.reader.try_lock() {
            guard.take();
        }
        self.pending.clear();
        tracing::debug!("session closed");
    }
}
