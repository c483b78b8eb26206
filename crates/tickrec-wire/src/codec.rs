//! Length-prefixed frame codec.
//!
//! Every frame on the wire is a 4-byte big-endian length followed by that
//! many bytes of serialized envelope. A non-positive length carries no body
//! and is skipped. A length above the configured maximum is fatal for the
//! stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::WireError;

/// Largest frame body accepted from or sent to the server.
pub const MAX_FRAME_LEN: usize = 1_000_000;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        loop {
            if src.len() < HEADER_LEN {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }

            let length = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
            if length <= 0 {
                trace!(length, "Skipping empty frame");
                src.advance(HEADER_LEN);
                continue;
            }

            let length = length as usize;
            if length > self.max_frame_len {
                return Err(WireError::FrameTooLarge {
                    length,
                    max: self.max_frame_len,
                });
            }

            let needed = HEADER_LEN + length;
            if src.len() < needed {
                src.reserve(needed - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            return Ok(Some(src.split_to(length).freeze()));
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), WireError> {
        if item.len() > self.max_frame_len {
            return Err(WireError::FrameTooLarge {
                length: item.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_encode_prefixes_big_endian_length() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"abcdef"), &mut dst)
            .unwrap();
        assert_eq!(&dst[..4], &[0, 0, 0, 6]);
        assert_eq!(&dst[4..], b"abcdef");
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let mut codec = FrameCodec::default();
        let wire = framed(b"hello world");

        // Feed one byte at a time; nothing is produced until the last byte.
        let mut src = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            src.put_u8(*byte);
            let result = codec.decode(&mut src).unwrap();
            if i + 1 < wire.len() {
                assert!(result.is_none());
            } else {
                assert_eq!(result.unwrap(), Bytes::from_static(b"hello world"));
            }
        }
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_any_chunking_yields_same_frames() {
        let bodies: Vec<Vec<u8>> = vec![
            b"first".to_vec(),
            (0..=255u8).cycle().take(4096).collect(),
            b"x".to_vec(),
        ];
        let wire: Vec<u8> = bodies.iter().flat_map(|b| framed(b)).collect();

        for chunk_size in [1usize, 2, 3, 5, 7, 64, 1000, wire.len()] {
            let mut codec = FrameCodec::default();
            let mut src = BytesMut::new();
            let mut decoded = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                src.extend_from_slice(chunk);
                while let Some(frame) = codec.decode(&mut src).unwrap() {
                    decoded.push(frame.to_vec());
                }
            }
            assert_eq!(decoded, bodies, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_decode_skips_non_positive_lengths() {
        let mut codec = FrameCodec::default();
        let mut src = BytesMut::new();
        src.put_i32(0);
        src.put_i32(-5);
        src.extend_from_slice(&framed(b"ok"));

        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame[..], b"ok");
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = FrameCodec::default();
        let mut src = BytesMut::new();
        src.put_u32(1_000_001);

        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(
            err,
            WireError::FrameTooLarge {
                length: 1_000_001,
                max: MAX_FRAME_LEN
            }
        ));
    }

    #[test]
    fn test_decode_accepts_maximum_length() {
        let mut codec = FrameCodec::default();
        let mut src = BytesMut::new();
        src.put_u32(MAX_FRAME_LEN as u32);
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_framed_read_reassembles_fragmented_reads() {
        let body: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let wire = framed(&body);

        let mut builder = tokio_test::io::Builder::new();
        builder.read(&wire[..1]);
        builder.read(&wire[1..3]);
        builder.read(&wire[3..10]);
        for chunk in wire[10..].chunks(997) {
            builder.read(chunk);
        }
        let mut frames = FramedRead::new(builder.build(), FrameCodec::default());

        let frame = frames.next().await.unwrap().unwrap();
        assert_eq!(&frame[..], &body[..]);
        assert!(frames.next().await.is_none());
    }
}
