//! Length-prefixed framing over AEAD output.
//!
//! Every frame body is preceded by a 2-byte big-endian length. The receive
//! side tolerates arbitrary transport chunking: bytes accumulate until a
//! whole frame is present, partial frames stay buffered.

use crate::error::MalformedInput;
use crate::specification::{FRAME_BODY_MAX_LEN, LEN_PREFIX_LEN};

/// Prefixes `body` with its big-endian length in a single allocation.
///
/// The caller guarantees `body.len() <= 65535`; sealers never produce more.
pub(crate) fn encode_frame(body: &[u8]) -> Vec<u8> {
    debug_assert!(body.len() <= FRAME_BODY_MAX_LEN);
    let mut frame = Vec::with_capacity(LEN_PREFIX_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Incremental frame parser for the receive side.
#[derive(Debug, Default)]
pub(crate) struct FrameAssembler {
    buf: Vec<u8>,
    read_pos: usize,
}

impl FrameAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a transport chunk to the reassembly buffer.
    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        // Reclaim consumed prefix before growing.
        if self.read_pos > 0 && self.read_pos == self.buf.len() {
            self.buf.clear();
            self.read_pos = 0;
        } else if self.read_pos > FRAME_BODY_MAX_LEN {
            self.buf.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Slices the next complete frame body off the buffer, if one is fully
    /// buffered. An incomplete frame is not an error, just `None`.
    pub(crate) fn next_frame(&mut self) -> Option<Vec<u8>> {
        let available = self.buf.len() - self.read_pos;
        if available < LEN_PREFIX_LEN {
            return None;
        }
        let declared = u16::from_be_bytes(
            self.buf[self.read_pos..self.read_pos + LEN_PREFIX_LEN]
                .try_into()
                .unwrap(),
        ) as usize;
        if available < LEN_PREFIX_LEN + declared {
            return None;
        }

        let start = self.read_pos + LEN_PREFIX_LEN;
        let body = self.buf[start..start + declared].to_vec();
        self.read_pos = start + declared;
        Some(body)
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub(crate) fn buffered(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Called when the transport ends: leftover bytes mean the peer promised
    /// a frame it never delivered.
    pub(crate) fn finish(&self) -> Result<(), MalformedInput> {
        let available = self.buffered();
        if available == 0 {
            return Ok(());
        }
        let declared = if available >= LEN_PREFIX_LEN {
            u16::from_be_bytes(
                self.buf[self.read_pos..self.read_pos + LEN_PREFIX_LEN]
                    .try_into()
                    .unwrap(),
            ) as usize
        } else {
            0
        };
        Err(MalformedInput::TruncatedFrame {
            declared,
            buffered: available,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frames_survive_arbitrary_split_points() {
        let bodies: [&[u8]; 3] = [&[0x00], &[0xFF; 1024], &[0x55; 65533]];
        let mut wire = Vec::new();
        for body in bodies {
            wire.extend_from_slice(&encode_frame(body));
        }

        for split in [1usize, 2, 3, 1025, 65535] {
            let mut assembler = FrameAssembler::new();
            assembler.feed(&wire[..split]);
            let mut got = Vec::new();
            while let Some(frame) = assembler.next_frame() {
                got.push(frame);
            }
            assembler.feed(&wire[split..]);
            while let Some(frame) = assembler.next_frame() {
                got.push(frame);
            }

            assert_eq!(got.len(), 3, "split at {split}");
            for (frame, body) in got.iter().zip(bodies.iter()) {
                assert_eq!(frame.as_slice(), *body, "split at {split}");
            }
            assert_eq!(assembler.buffered(), 0);
            assert!(assembler.finish().is_ok());
        }
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let wire = encode_frame(b"drip-fed frame");
        let mut assembler = FrameAssembler::new();
        for (i, &b) in wire.iter().enumerate() {
            assembler.feed(&[b]);
            let frame = assembler.next_frame();
            if i + 1 < wire.len() {
                assert!(frame.is_none());
            } else {
                assert_eq!(frame.unwrap(), b"drip-fed frame");
            }
        }
    }

    #[test]
    fn test_zero_length_frame() {
        let mut assembler = FrameAssembler::new();
        assembler.feed(&encode_frame(&[]));
        assert_eq!(assembler.next_frame().unwrap(), Vec::<u8>::new());
        assert!(assembler.next_frame().is_none());
    }

    #[test]
    fn test_truncated_frame_is_reported_at_eof() {
        let mut assembler = FrameAssembler::new();
        let wire = encode_frame(&[0xABu8; 100]);
        assembler.feed(&wire[..50]);
        assert!(assembler.next_frame().is_none());

        let err = assembler.finish().unwrap_err();
        assert_eq!(
            err,
            MalformedInput::TruncatedFrame {
                declared: 100,
                buffered: 50
            }
        );
    }

    #[test]
    fn test_buffer_compaction_keeps_pending_bytes() {
        let mut assembler = FrameAssembler::new();
        // Enough traffic to force the drain path, with a split frame active.
        for _ in 0..4 {
            assembler.feed(&encode_frame(&[0x77u8; 40000]));
            assert_eq!(assembler.next_frame().unwrap().len(), 40000);
        }
        let wire = encode_frame(b"tail");
        assembler.feed(&wire[..3]);
        assert!(assembler.next_frame().is_none());
        assembler.feed(&wire[3..]);
        assert_eq!(assembler.next_frame().unwrap(), b"tail");
    }
}
