//! Envelope Framing
//!
//! One frame on the wire is `u32_le(tag_len) + u32_le(payload_len) +
//! tag_bytes(UTF-8) + payload_bytes`. The explicit length prefixes make the
//! frame self-delimiting, so the same codec works whether or not the
//! underlying channel preserves message boundaries. Byte order is fixed
//! little-endian; both ends of the wire must agree.
//!
//! Encoding produces the whole frame as one contiguous buffer so the write
//! path can hand it to the socket in a single write. Decoding is
//! incremental: [`FrameDecoder`] buffers arbitrary read chunks and yields
//! complete envelopes, tolerating any partial-read boundaries.

use crate::error::{Result, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Two little-endian u32 length fields
pub(crate) const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on the type tag section. Tags are short registry strings; a
/// longer length field means the stream is corrupt.
pub(crate) const MAX_TAG_LEN: usize = 4096;

/// One decoded wire record: a type tag naming the payload's registration,
/// plus the serialized payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub type_tag: String,
    pub payload: Bytes,
}

/// Encode one message into a single self-delimiting frame.
///
/// Fails if the tag or the total frame would exceed the configured caps; the
/// caller treats that as a serialization failure for the message's tag.
pub fn encode_frame(tag: &str, payload: &[u8], max_frame_size: usize) -> Result<Bytes> {
    let tag_bytes = tag.as_bytes();
    if tag_bytes.len() > MAX_TAG_LEN {
        return Err(TransportError::serialization(
            tag,
            format!("type tag exceeds {} bytes", MAX_TAG_LEN),
        ));
    }

    let total = FRAME_HEADER_LEN + tag_bytes.len() + payload.len();
    if total > max_frame_size {
        return Err(TransportError::serialization(
            tag,
            format!(
                "encoded frame of {} bytes exceeds maximum {}",
                total, max_frame_size
            ),
        ));
    }

    let mut frame = BytesMut::with_capacity(total);
    frame.put_u32_le(tag_bytes.len() as u32);
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(tag_bytes);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Incremental frame reassembler.
///
/// Feed it whatever the socket read returned; [`FrameDecoder::try_next`]
/// yields an envelope once both length-prefixed sections are buffered and
/// `None` while a frame is still incomplete. Corrupt length fields are the
/// only error case.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append raw bytes read from the channel.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// True when the buffer holds the start of a frame that has not
    /// completed. Used to tell a clean peer disconnect from a truncated
    /// stream.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Try to decode the next complete frame from the buffer.
    pub fn try_next(&mut self) -> Result<Option<Envelope>> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut field = [0u8; 4];
        field.copy_from_slice(&self.buffer[0..4]);
        let tag_len = u32::from_le_bytes(field) as usize;
        field.copy_from_slice(&self.buffer[4..8]);
        let payload_len = u32::from_le_bytes(field) as usize;

        if tag_len > MAX_TAG_LEN {
            return Err(TransportError::read(format!(
                "frame tag length {} exceeds {}; stream is corrupt",
                tag_len, MAX_TAG_LEN
            )));
        }
        let total = FRAME_HEADER_LEN + tag_len + payload_len;
        if total > self.max_frame_size {
            return Err(TransportError::read(format!(
                "frame of {} bytes exceeds maximum {}",
                total, self.max_frame_size
            )));
        }

        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_LEN);
        let tag_bytes = self.buffer.split_to(tag_len);
        let payload = self.buffer.split_to(payload_len).freeze();

        let type_tag = String::from_utf8(tag_bytes.to_vec())
            .map_err(|_| TransportError::read("frame type tag is not valid UTF-8"))?;

        Ok(Some(Envelope { type_tag, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAX: usize = 1024 * 1024;

    #[test]
    fn wire_layout_is_little_endian() {
        let frame = encode_frame("ab", &[1, 2, 3], MAX).unwrap();
        assert_eq!(
            frame.as_ref(),
            &[2, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', 1, 2, 3]
        );
    }

    #[test]
    fn roundtrip_single_frame() {
        let frame = encode_frame("demo.ping", b"{\"n\":1}", MAX).unwrap();
        let mut decoder = FrameDecoder::new(MAX);
        decoder.extend(&frame);
        let envelope = decoder.try_next().unwrap().unwrap();
        assert_eq!(envelope.type_tag, "demo.ping");
        assert_eq!(envelope.payload.as_ref(), b"{\"n\":1}");
        assert!(decoder.try_next().unwrap().is_none());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn partial_input_yields_none_until_complete() {
        let frame = encode_frame("t", b"payload", MAX).unwrap();
        let mut decoder = FrameDecoder::new(MAX);
        for &byte in frame[..frame.len() - 1].iter() {
            decoder.extend(&[byte]);
            assert!(decoder.try_next().unwrap().is_none());
        }
        assert!(decoder.has_partial());
        decoder.extend(&frame[frame.len() - 1..]);
        assert!(decoder.try_next().unwrap().is_some());
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&encode_frame("a", b"first", MAX).unwrap());
        chunk.extend_from_slice(&encode_frame("b", b"second", MAX).unwrap());

        let mut decoder = FrameDecoder::new(MAX);
        decoder.extend(&chunk);
        assert_eq!(decoder.try_next().unwrap().unwrap().type_tag, "a");
        assert_eq!(decoder.try_next().unwrap().unwrap().type_tag, "b");
        assert!(decoder.try_next().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected_on_encode() {
        let payload = vec![0u8; 64];
        let err = encode_frame("t", &payload, 32).unwrap_err();
        assert!(matches!(err, TransportError::Serialization { .. }));
    }

    #[test]
    fn oversized_tag_is_rejected_on_encode() {
        let tag = "x".repeat(MAX_TAG_LEN + 1);
        let err = encode_frame(&tag, b"", MAX).unwrap_err();
        assert!(matches!(err, TransportError::Serialization { .. }));
    }

    #[test]
    fn corrupt_length_field_is_rejected_on_decode() {
        let mut decoder = FrameDecoder::new(MAX);
        // tag_len far past MAX_TAG_LEN
        decoder.extend(&u32::MAX.to_le_bytes());
        decoder.extend(&0u32.to_le_bytes());
        assert!(matches!(
            decoder.try_next(),
            Err(TransportError::Read { .. })
        ));
    }

    #[test]
    fn empty_payload_roundtrips() {
        let frame = encode_frame("empty", &[], MAX).unwrap();
        let mut decoder = FrameDecoder::new(MAX);
        decoder.extend(&frame);
        let envelope = decoder.try_next().unwrap().unwrap();
        assert_eq!(envelope.type_tag, "empty");
        assert!(envelope.payload.is_empty());
    }

    proptest! {
        /// Feeding an encoded frame through any chunking reconstructs it.
        #[test]
        fn reassembles_across_arbitrary_splits(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk_size in 1usize..64,
        ) {
            let frame = encode_frame("prop.msg", &payload, MAX).unwrap();
            let mut decoder = FrameDecoder::new(MAX);

            let mut decoded = None;
            for chunk in frame.chunks(chunk_size) {
                decoder.extend(chunk);
                if let Some(envelope) = decoder.try_next().unwrap() {
                    decoded = Some(envelope);
                }
            }

            let envelope = decoded.expect("frame must complete");
            prop_assert_eq!(envelope.type_tag, "prop.msg");
            prop_assert_eq!(envelope.payload.as_ref(), payload.as_slice());
            prop_assert!(!decoder.has_partial());
        }
    }
}
