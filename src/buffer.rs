//! Reassembly buffer: turns arbitrary stream reads into complete frames.
//!
//! Stream reads land in a fixed-size scratch buffer and are appended to a
//! growable accumulation buffer. [`FrameBuffer::next_body`] drains zero or
//! more complete, checksum-validated frame bodies out of the accumulation:
//! a single read may complete several frames, and a single frame may span
//! any number of reads.
//!
//! Corruption (wrong delimiter, implausible size, checksum mismatch) is
//! recovered locally: the buffer scans forward for the next delimiter
//! occurrence and silently drops the bytes before it. Corrupt frames never
//! surface as errors.

use crate::{checksum, FRAME_DELIMITER, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use bytes::{Buf, Bytes, BytesMut};

/// Default receive scratch size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum receive scratch size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum receive scratch size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Accumulates raw stream bytes and extracts complete frame bodies.
///
/// After every successful extraction the accumulation begins at a frame
/// boundary (or at the post-resync point), never mid-frame.
pub struct FrameBuffer {
    /// Fixed-capacity buffer the transport reads into on each poll.
    scratch: Vec<u8>,
    /// Bytes not yet resolved into complete frames. Grows as needed.
    accumulation: BytesMut,
    /// Frames claiming a larger gross size are treated as corruption.
    max_frame_size: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_read_buffer_size(DEFAULT_READ_BUFFER_SIZE)
    }

    /// Creates a buffer with a custom scratch size, clamped to
    /// [`MIN_READ_BUFFER_SIZE`]..=[`MAX_READ_BUFFER_SIZE`].
    pub fn with_read_buffer_size(size: usize) -> Self {
        let size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        Self {
            scratch: vec![0u8; size],
            accumulation: BytesMut::with_capacity(size * 2),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// The scratch buffer for the next transport read.
    pub fn scratch(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    /// Moves the first `n` scratch bytes into the accumulation.
    pub fn commit_scratch(&mut self, n: usize) {
        let n = n.min(self.scratch.len());
        self.accumulation.extend_from_slice(&self.scratch[..n]);
    }

    /// Appends bytes read from the stream to the accumulation.
    pub fn ingest(&mut self, data: &[u8]) {
        self.accumulation.extend_from_slice(data);
    }

    /// Extracts the next complete, checksum-validated frame body, or
    /// `None` if the accumulation does not yet hold a full frame.
    ///
    /// Corrupt data is skipped via resync and the scan continues; this
    /// method only stops on insufficient data.
    pub fn next_body(&mut self) -> Option<Bytes> {
        loop {
            if self.accumulation.len() <= FRAME_HEADER_SIZE {
                return None;
            }

            let acc = &self.accumulation[..];
            let delimiter = i32::from_le_bytes([acc[0], acc[1], acc[2], acc[3]]);
            let gross_size = i32::from_le_bytes([acc[4], acc[5], acc[6], acc[7]]);
            let expected_crc = u16::from_le_bytes([acc[8], acc[9]]);

            if delimiter != FRAME_DELIMITER
                || gross_size < FRAME_HEADER_SIZE as i32
                || gross_size as usize > self.max_frame_size
            {
                tracing::debug!(
                    delimiter,
                    gross_size,
                    "corrupt frame header, resynchronizing"
                );
                self.resync();
                continue;
            }

            let gross_size = gross_size as usize;
            if self.accumulation.len() < gross_size {
                // Not enough data yet for the whole frame; wait for more.
                return None;
            }

            if checksum::compute(&acc[FRAME_HEADER_SIZE..gross_size]) != expected_crc {
                tracing::debug!(gross_size, "frame checksum mismatch, resynchronizing");
                self.resync();
                continue;
            }

            let mut frame = self.accumulation.split_to(gross_size);
            frame.advance(FRAME_HEADER_SIZE);
            return Some(frame.freeze());
        }
    }

    /// Scans forward from offset 1 for the next delimiter occurrence and
    /// discards everything before it. With no delimiter anywhere, the whole
    /// accumulation is dropped: the stream has no recoverable frame
    /// boundary until more bytes arrive.
    fn resync(&mut self) {
        let delimiter = FRAME_DELIMITER.to_le_bytes();
        let acc = &self.accumulation[..];

        for offset in 1..acc.len().saturating_sub(delimiter.len() - 1) {
            if acc[offset..offset + delimiter.len()] == delimiter {
                self.accumulation.advance(offset);
                return;
            }
        }
        self.accumulation.clear();
    }

    /// Number of accumulated bytes not yet resolved into frames.
    pub fn len(&self) -> usize {
        self.accumulation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulation.is_empty()
    }

    /// Drops all accumulated bytes.
    pub fn clear(&mut self) {
        self.accumulation.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::envelope::FrameEnvelope;
    use proptest::prelude::*;

    fn frame_for(payload: &[u8]) -> (Bytes, BytesMut) {
        let envelope = FrameEnvelope::from_bytes(Bytes::copy_from_slice(payload));
        let encoded = envelope.encode().unwrap();
        let wire = codec::assemble(&envelope, None).unwrap();
        // `next_body` yields the compressed body; tests compare against the
        // envelope bytes after decompression.
        (encoded.freeze(), wire)
    }

    fn body_to_envelope(body: &[u8]) -> Bytes {
        Bytes::from(codec::decompress(body).unwrap())
    }

    #[test]
    fn test_single_complete_frame() {
        let (encoded, wire) = frame_for(b"hello");
        let mut buffer = FrameBuffer::new();

        buffer.ingest(&wire);
        let body = buffer.next_body().unwrap();
        assert_eq!(body_to_envelope(&body), encoded);
        assert!(buffer.next_body().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let (encoded, wire) = frame_for(b"fragmented");
        let mut buffer = FrameBuffer::new();

        let mut bodies = Vec::new();
        for byte in wire.iter() {
            buffer.ingest(&[*byte]);
            while let Some(body) = buffer.next_body() {
                bodies.push(body);
            }
        }

        assert_eq!(bodies.len(), 1);
        assert_eq!(body_to_envelope(&bodies[0]), encoded);
    }

    #[test]
    fn test_coalesced_frames_in_order() {
        let (encoded1, wire1) = frame_for(b"first");
        let (encoded2, wire2) = frame_for(b"second");
        let (encoded3, wire3) = frame_for(b"third");

        let mut combined = Vec::new();
        combined.extend_from_slice(&wire1);
        combined.extend_from_slice(&wire2);
        combined.extend_from_slice(&wire3);

        let mut buffer = FrameBuffer::new();
        buffer.ingest(&combined);

        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded1);
        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded2);
        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded3);
        assert!(buffer.next_body().is_none());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let (encoded, wire) = frame_for(b"split across reads");
        let mut buffer = FrameBuffer::new();

        buffer.ingest(&wire[..FRAME_HEADER_SIZE + 3]);
        assert!(buffer.next_body().is_none());
        assert!(!buffer.is_empty());

        buffer.ingest(&wire[FRAME_HEADER_SIZE + 3..]);
        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded);
    }

    #[test]
    fn test_garbage_prefix_resyncs_to_frame() {
        let (encoded, wire) = frame_for(b"survivor");
        let mut buffer = FrameBuffer::new();

        // Garbage that cannot contain the delimiter.
        let mut data = vec![0xAAu8; 64];
        data.extend_from_slice(&wire);
        buffer.ingest(&data);

        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded);
    }

    #[test]
    fn test_corrupt_body_dropped_next_frame_survives() {
        let (_, mut bad) = frame_for(b"corrupted in flight");
        let (encoded, good) = frame_for(b"intact");

        // Flip a body byte so the checksum no longer matches.
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mut data = bad.to_vec();
        data.extend_from_slice(&good);

        let mut buffer = FrameBuffer::new();
        buffer.ingest(&data);

        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded);
        assert!(buffer.next_body().is_none());
    }

    #[test]
    fn test_garbage_only_clears_accumulation() {
        let mut buffer = FrameBuffer::new();
        buffer.ingest(&[0x55u8; 128]);
        assert!(buffer.next_body().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_implausible_size_triggers_resync() {
        let (encoded, wire) = frame_for(b"after the lie");

        // A header with a valid delimiter but a negative gross size.
        let mut data = Vec::new();
        data.extend_from_slice(&FRAME_DELIMITER.to_le_bytes());
        data.extend_from_slice(&(-5i32).to_le_bytes());
        data.extend_from_slice(&[0u8; 2]);
        data.extend_from_slice(&wire);

        let mut buffer = FrameBuffer::new();
        buffer.ingest(&data);
        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded);
    }

    #[test]
    fn test_scratch_size_clamped() {
        let buffer = FrameBuffer::with_read_buffer_size(10);
        assert_eq!(buffer.scratch.len(), MIN_READ_BUFFER_SIZE);

        let buffer = FrameBuffer::with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(buffer.scratch.len(), MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_commit_scratch() {
        let (encoded, wire) = frame_for(b"via scratch");
        let mut buffer = FrameBuffer::new();

        buffer.scratch()[..wire.len()].copy_from_slice(&wire);
        buffer.commit_scratch(wire.len());

        assert_eq!(body_to_envelope(&buffer.next_body().unwrap()), encoded);
    }

    proptest! {
        /// Any chunking of a frame sequence yields the same bodies as one
        /// ingest of the whole sequence.
        #[test]
        fn prop_fragmentation_independence(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..4),
            cuts in prop::collection::vec(1usize..40, 0..8),
        ) {
            let mut wire = Vec::new();
            let mut expected = Vec::new();
            for payload in &payloads {
                let (encoded, frame) = frame_for(payload);
                expected.push(encoded);
                wire.extend_from_slice(&frame);
            }

            let mut buffer = FrameBuffer::new();
            let mut bodies = Vec::new();
            let mut rest = &wire[..];
            for cut in cuts {
                let cut = cut.min(rest.len());
                let (chunk, tail) = rest.split_at(cut);
                rest = tail;
                buffer.ingest(chunk);
                while let Some(body) = buffer.next_body() {
                    bodies.push(body_to_envelope(&body));
                }
            }
            buffer.ingest(rest);
            while let Some(body) = buffer.next_body() {
                bodies.push(body_to_envelope(&body));
            }

            prop_assert_eq!(bodies, expected);
        }

        /// Garbage injected between complete frames never loses the intact
        /// frames and never panics.
        #[test]
        fn prop_corruption_recovery(
            noise in prop::collection::vec(any::<u8>(), 1..64),
        ) {
            let (encoded1, wire1) = frame_for(b"before the noise");
            let (encoded2, wire2) = frame_for(b"after the noise");

            let mut data = wire1.to_vec();
            data.extend_from_slice(&noise);
            data.extend_from_slice(&wire2);

            let mut buffer = FrameBuffer::new();
            buffer.ingest(&data);

            let mut bodies = Vec::new();
            while let Some(body) = buffer.next_body() {
                bodies.push(body_to_envelope(&body));
            }

            // The first frame always survives; the second may be consumed
            // only if the noise happens to embed a delimiter that parses as
            // a valid frame prefix, which the checksum then rejects.
            prop_assert!(!bodies.is_empty());
            prop_assert_eq!(&bodies[0], &encoded1);
            prop_assert!(bodies.len() <= 2);
            if bodies.len() == 2 {
                prop_assert_eq!(&bodies[1], &encoded2);
            }
        }
    }
}
