//! The reversible byte <-> hint-stream transformation.
//!
//! Masking expands every plaintext byte into four hint bytes in a permuted
//! order, interleaved with padding drawn from the padding pool. Unmasking
//! recognizes hint bytes by their bit pattern, discards padding, and folds
//! hint quadruples back into bytes via the decode table.
//!
//! The mask RNG is not shared with the peer; its advance order is still part
//! of the wire contract in the sense that masking is a plausibility filter,
//! not a cipher. Decoding is deterministic for any valid hint stream.

use std::sync::Arc;

use crate::error::ResourceExhausted;
use crate::specification::{mask_output_bound, KEY_LEN};
use crate::tables::{is_hint_candidate, pack_hints, CodecTables, Lcg32, PADDING_POOL, PERM4};

/// Probability of a padding byte at each opportunity: 0.3 * 2^16, scaled
/// into the top 16 bits of the 32-bit compare space.
pub(crate) const PADDING_THRESHOLD: u32 = 19661 << 16;

/// Masking half of the codec; owns the per-session RNG.
#[derive(Debug)]
pub(crate) struct MaskEncoder {
    tables: Arc<CodecTables>,
    rng: Lcg32,
}

impl MaskEncoder {
    pub(crate) fn new(tables: Arc<CodecTables>, key: &[u8; KEY_LEN]) -> Self {
        Self {
            tables,
            rng: Lcg32::from_key(key),
        }
    }

    /// Masks `input`, refusing up front if the worst-case output would
    /// exceed `limit`.
    pub(crate) fn mask(&mut self, input: &[u8], limit: usize) -> Result<Vec<u8>, ResourceExhausted> {
        let bound = mask_output_bound(input.len());
        if bound > limit {
            return Err(ResourceExhausted::MaskOutputCeiling { needed: bound });
        }

        let mut out = Vec::with_capacity(bound);
        if input.is_empty() {
            return Ok(out);
        }

        for &b in input {
            self.maybe_pad(&mut out);
            self.rng.advance();

            let entries = self.tables.encode_entries(b);
            if entries.is_empty() {
                // Unreachable for a well-formed table; kept as a fallback.
                out.push(b);
                continue;
            }

            let hints = entries[self.rng.peek() as usize % entries.len()];
            self.rng.advance();
            let perm = PERM4[self.rng.peek() as usize % PERM4.len()];
            self.rng.advance();

            for &j in &perm {
                self.maybe_pad(&mut out);
                self.rng.advance();
                out.push(hints[j as usize]);
            }
        }

        self.maybe_pad(&mut out);
        Ok(out)
    }

    /// One padding draw: compare the current state against the threshold,
    /// and on a hit advance once to pick the pool byte. The caller's
    /// unconditional advance follows; the ordering is fixed.
    fn maybe_pad(&mut self, out: &mut Vec<u8>) {
        if self.rng.peek() < PADDING_THRESHOLD {
            let idx = self.rng.advance() as usize % PADDING_POOL.len();
            out.push(PADDING_POOL[idx]);
        }
    }
}

/// Unmasking half of the codec.
///
/// The four-slot accumulator persists across calls, so a hint quadruple
/// split over two transport chunks still decodes.
#[derive(Debug)]
pub(crate) struct HintDecoder {
    tables: Arc<CodecTables>,
    acc: [u8; 4],
    acc_len: usize,
}

impl HintDecoder {
    pub(crate) fn new(tables: Arc<CodecTables>) -> Self {
        Self {
            tables,
            acc: [0u8; 4],
            acc_len: 0,
        }
    }

    /// Feeds masked bytes, appending every decoded plaintext byte to `out`.
    ///
    /// Quadruples with no decode-table entry are discarded; the accumulator
    /// resets after every lookup.
    pub(crate) fn unmask(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &b in input {
            if !is_hint_candidate(b) {
                continue;
            }

            self.acc[self.acc_len] = b;
            self.acc_len += 1;
            if self.acc_len == 4 {
                if let Some(v) = self.tables.decode(pack_hints(self.acc)) {
                    out.push(v);
                }
                self.acc_len = 0;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::specification::MASK_OUTPUT_CEILING;
    use crate::tables::PADDING_POOL;

    fn codec_pair(key: [u8; 32]) -> (MaskEncoder, HintDecoder) {
        let tables = CodecTables::for_key(&key);
        (
            MaskEncoder::new(Arc::clone(&tables), &key),
            HintDecoder::new(tables),
        )
    }

    #[test]
    fn test_mask_unmask_hello_world() {
        let (mut enc, mut dec) = codec_pair([0u8; 32]);
        let plaintext = b"Hello, World!\n";

        let masked = enc.mask(plaintext, MASK_OUTPUT_CEILING).unwrap();
        assert!(masked.len() <= mask_output_bound(plaintext.len()));
        for &b in &masked {
            assert!(
                is_hint_candidate(b) || PADDING_POOL.contains(&b),
                "unexpected byte {b:#04x} in masked stream"
            );
        }

        let mut out = Vec::new();
        dec.unmask(&masked, &mut out);
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let key = [0x11u8; 32];
        let (mut enc, mut dec) = codec_pair(key);
        let plaintext: Vec<u8> = (0..=255u8).collect();

        let masked = enc.mask(&plaintext, MASK_OUTPUT_CEILING).unwrap();
        let mut out = Vec::new();
        dec.unmask(&masked, &mut out);
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_unmask_survives_arbitrary_chunking() {
        let (mut enc, _) = codec_pair([0u8; 32]);
        let plaintext = b"chunk boundaries must not matter";
        let masked = enc.mask(plaintext, MASK_OUTPUT_CEILING).unwrap();

        for chunk_len in [1usize, 2, 3, 5, 7, 16] {
            let tables = CodecTables::for_key(&[0u8; 32]);
            let mut dec = HintDecoder::new(tables);
            let mut out = Vec::new();
            for chunk in masked.chunks(chunk_len) {
                dec.unmask(chunk, &mut out);
            }
            assert_eq!(out, plaintext, "chunk length {chunk_len}");
        }
    }

    #[test]
    fn test_consecutive_masks_share_rng_state() {
        let (mut enc, mut dec) = codec_pair([0x42u8; 32]);

        // Two calls continue the same LCG stream; both decode.
        let first = enc.mask(b"first", MASK_OUTPUT_CEILING).unwrap();
        let second = enc.mask(b"second", MASK_OUTPUT_CEILING).unwrap();

        let mut out = Vec::new();
        dec.unmask(&first, &mut out);
        dec.unmask(&second, &mut out);
        assert_eq!(out, b"firstsecond");
    }

    #[test]
    fn test_empty_input_masks_to_nothing() {
        let (mut enc, _) = codec_pair([0u8; 32]);
        assert!(enc.mask(&[], MASK_OUTPUT_CEILING).unwrap().is_empty());
    }

    #[test]
    fn test_padding_only_stream_decodes_to_nothing() {
        let (_, mut dec) = codec_pair([0u8; 32]);
        let mut out = Vec::new();
        dec.unmask(&PADDING_POOL, &mut out);
        dec.unmask(b"  \n\t", &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_output_ceiling_is_enforced() {
        let (mut enc, _) = codec_pair([0u8; 32]);
        let big = vec![0u8; MASK_OUTPUT_CEILING];
        let err = enc.mask(&big, MASK_OUTPUT_CEILING).unwrap_err();
        assert!(matches!(err, ResourceExhausted::MaskOutputCeiling { .. }));
    }

    #[test]
    fn test_unmask_ignores_foreign_bytes() {
        let (mut enc, mut dec) = codec_pair([0u8; 32]);
        let masked = enc.mask(b"payload", MASK_OUTPUT_CEILING).unwrap();

        // Interleave padding-class noise; the decode must be unaffected.
        let mut noisy = Vec::new();
        for b in masked {
            noisy.push(0x20);
            noisy.push(b);
        }
        let mut out = Vec::new();
        dec.unmask(&noisy, &mut out);
        assert_eq!(out, b"payload");
    }
}
