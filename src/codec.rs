//! Frame body codec: compression, the encryption hook, and the header.
//!
//! Outbound: envelope -> encode -> deflate -> encrypt -> checksum -> header.
//! Inbound reverses it on a body the reassembly buffer already validated:
//! decrypt -> inflate -> decode.

use crate::checksum;
use crate::envelope::FrameEnvelope;
use crate::error::FramingError;
use crate::{FRAME_DELIMITER, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use bytes::{BufMut, BytesMut};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Hook applied to frame bodies after compression on the way out and
/// before decompression on the way in. Encryption, signing, or any other
/// symmetric byte transform; both directions must compose to the identity.
///
/// A stateful implementation is responsible for its own thread safety.
pub trait EncryptionProvider: Send + Sync {
    /// Transforms the compressed body before it is framed and sent.
    fn encrypt(&self, payload: &[u8]) -> Vec<u8>;

    /// Inverse of [`encrypt`](Self::encrypt), applied to a received body.
    fn decrypt(&self, payload: &[u8]) -> Vec<u8>;
}

/// Deflate-compresses `data` at the maximum compression setting. Empty
/// input yields empty output.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, FramingError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, FramingError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(FramingError::Decompression)?;
    Ok(out)
}

/// Assembles a complete wire frame from an envelope.
///
/// Returns one immutable buffer for the caller to write in full; no
/// partial-write handling happens here.
pub fn assemble(
    envelope: &FrameEnvelope,
    crypto: Option<&dyn EncryptionProvider>,
) -> Result<BytesMut, FramingError> {
    let encoded = envelope.encode()?;
    let mut body = compress(&encoded)?;
    if let Some(crypto) = crypto {
        body = crypto.encrypt(&body);
    }

    let gross_size = body.len() + FRAME_HEADER_SIZE;
    if gross_size > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge {
            size: gross_size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(gross_size);
    buf.put_i32_le(FRAME_DELIMITER);
    buf.put_i32_le(gross_size as i32);
    buf.put_u16_le(checksum::compute(&body));
    buf.put_slice(&body);
    Ok(buf)
}

/// Opens a validated frame body back into its envelope.
pub fn open_body(
    body: &[u8],
    crypto: Option<&dyn EncryptionProvider>,
) -> Result<FrameEnvelope, FramingError> {
    let decrypted;
    let body = match crypto {
        Some(crypto) => {
            decrypted = crypto.decrypt(body);
            &decrypted[..]
        }
        None => body,
    };
    let encoded = decompress(body)?;
    FrameEnvelope::decode(&encoded)
}
