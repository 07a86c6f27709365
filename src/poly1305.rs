//! Poly1305 one-time authenticator over GF(2^130 - 5).
//!
//! The accumulator lives in three 64-bit limbs (`h2` holds the top two bits
//! after each reduction). All multi-word arithmetic goes through widening
//! 64x64 -> 128 multiplies and add-with-carry; no branch depends on secret
//! data.

use subtle::ConstantTimeEq;

use crate::specification::TAG_LEN;

/// Clamping masks applied to the `r` half of the key.
const R_MASK_0: u64 = 0x0FFF_FFFC_0FFF_FFFF;
const R_MASK_1: u64 = 0x0FFF_FFFC_0FFF_FFFC;

/// Incremental Poly1305 state.
#[derive(Clone)]
pub(crate) struct Poly1305 {
    h: [u64; 3],
    r: [u64; 2],
    s: [u64; 2],
    buffer: [u8; TAG_LEN],
    offset: usize,
}

impl Poly1305 {
    pub(crate) fn new(key: &[u8; 32]) -> Self {
        Self {
            h: [0; 3],
            r: [
                u64::from_le_bytes(key[0..8].try_into().unwrap()) & R_MASK_0,
                u64::from_le_bytes(key[8..16].try_into().unwrap()) & R_MASK_1,
            ],
            s: [
                u64::from_le_bytes(key[16..24].try_into().unwrap()),
                u64::from_le_bytes(key[24..32].try_into().unwrap()),
            ],
            buffer: [0u8; TAG_LEN],
            offset: 0,
        }
    }

    pub(crate) fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let n = core::cmp::min(TAG_LEN - self.offset, data.len());
            self.buffer[self.offset..self.offset + n].copy_from_slice(&data[..n]);
            self.offset += n;
            data = &data[n..];

            if self.offset == TAG_LEN {
                let block = self.buffer;
                self.update_block(&block, false);
                self.offset = 0;
            }
        }
    }

    pub(crate) fn finalize(mut self) -> [u8; TAG_LEN] {
        if self.offset > 0 {
            // Final short block: the 1 marker goes into the byte following
            // the message instead of the implicit bit 128.
            let mut block = [0u8; TAG_LEN];
            block[..self.offset].copy_from_slice(&self.buffer[..self.offset]);
            block[self.offset] = 1;
            self.update_block(&block, true);
        }

        let [h0, h1, h2] = self.h;

        // g = h + 5; g reaching 2^130 means h >= 2^130 - 5, in which case g
        // (with the top bits dropped) is the reduced value, otherwise h
        // already is. Selected with a mask, not a branch.
        let (g0, c) = adc(h0, 5, 0);
        let (g1, c) = adc(h1, 0, c);
        let g2 = h2.wrapping_add(c);

        let keep_g = (g2 >> 2).wrapping_neg(); // all-ones iff g >= 2^130
        let h0 = (h0 & !keep_g) | (g0 & keep_g);
        let h1 = (h1 & !keep_g) | (g1 & keep_g);

        // tag = (h + s) mod 2^128
        let (t0, c) = adc(h0, self.s[0], 0);
        let (t1, _) = adc(h1, self.s[1], c);

        let mut out = [0u8; TAG_LEN];
        out[..8].copy_from_slice(&t0.to_le_bytes());
        out[8..].copy_from_slice(&t1.to_le_bytes());
        out
    }

    fn update_block(&mut self, block: &[u8; TAG_LEN], is_final: bool) {
        let [mut h0, mut h1, mut h2] = self.h;
        let [r0, r1] = self.r;

        // h += m, plus 2^128 for full blocks.
        let m0 = u64::from_le_bytes(block[0..8].try_into().unwrap());
        let m1 = u64::from_le_bytes(block[8..16].try_into().unwrap());
        let (a, c) = adc(h0, m0, 0);
        h0 = a;
        let (a, c) = adc(h1, m1, c);
        h1 = a;
        h2 = h2.wrapping_add(c).wrapping_add(if is_final { 0 } else { 1 });

        // h *= r. The high products cannot overflow: h2 <= 7 and the top
        // four bits of r0/r1 are clamped to zero.
        let p0 = mul64(h0, r0);
        let p1 = mul64(h1, r0) + mul64(h0, r1);
        let p2 = mul64(h2, r0) + mul64(h1, r1);
        let p3 = mul64(h2, r1);

        let t0 = p0 as u64;
        let (t1, c) = adc(p1 as u64, (p0 >> 64) as u64, 0);
        let (t2, c) = adc(p2 as u64, (p1 >> 64) as u64, c);
        let (t3, _) = adc(p3 as u64, (p2 >> 64) as u64, c);

        // Reduce mod 2^130 - 5 with c * 2^130 + n == c * 5 + n: split at bit
        // 130, then add the carry back as 4c + c.
        h0 = t0;
        h1 = t1;
        h2 = t2 & 3;
        let cc = ((t3 as u128) << 64) | (t2 & !3u64) as u128;

        let (a, c) = adc(h0, cc as u64, 0);
        h0 = a;
        let (a, c) = adc(h1, (cc >> 64) as u64, c);
        h1 = a;
        h2 = h2.wrapping_add(c);

        let cc = cc >> 2;
        let (a, c) = adc(h0, cc as u64, 0);
        h0 = a;
        let (a, c) = adc(h1, (cc >> 64) as u64, c);
        h1 = a;
        h2 = h2.wrapping_add(c);

        self.h = [h0, h1, h2];
    }
}

impl core::fmt::Debug for Poly1305 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Poly1305").finish_non_exhaustive()
    }
}

/// One-shot tag over `msg`.
pub(crate) fn authenticate(key: &[u8; 32], msg: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = Poly1305::new(key);
    mac.update(msg);
    mac.finalize()
}

/// Constant-time comparison of a computed tag against a received one.
pub(crate) fn tags_match(computed: &[u8; TAG_LEN], received: &[u8]) -> bool {
    received.len() == TAG_LEN && bool::from(computed[..].ct_eq(received))
}

#[inline]
fn adc(a: u64, b: u64, carry: u64) -> (u64, u64) {
    let t = a as u128 + b as u128 + carry as u128;
    (t as u64, (t >> 64) as u64)
}

#[inline]
fn mul64(a: u64, b: u64) -> u128 {
    a as u128 * b as u128
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 8439 section 2.5.2
    #[test]
    fn test_tag_vector() {
        let key: [u8; 32] =
            hex::decode("85d6be7857556d337f4452fe42d506a80103808afb0db2fd4abff6af4149f51b")
                .unwrap()
                .try_into()
                .unwrap();
        let msg = b"Cryptographic Forum Research Group";
        let tag = authenticate(&key, msg);
        assert_eq!(hex::encode(tag), "a8061dc1305136c6c22b8baf0c0127a9");
    }

    #[test]
    fn test_chunked_update_matches_one_shot() {
        let key = [0x42u8; 32];
        let msg: Vec<u8> = (0..257u16).map(|i| (i % 256) as u8).collect();
        let whole = authenticate(&key, &msg);

        for split in [1usize, 15, 16, 17, 100, 256] {
            let mut mac = Poly1305::new(&key);
            mac.update(&msg[..split]);
            mac.update(&msg[split..]);
            assert_eq!(mac.finalize(), whole, "split at {split}");
        }
    }

    #[test]
    fn test_tags_match_rejects_changes() {
        let key = [9u8; 32];
        let tag = authenticate(&key, b"some message");
        assert!(tags_match(&tag, &tag));

        let mut bad = tag;
        bad[15] ^= 0x01;
        assert!(!tags_match(&tag, &bad));
        assert!(!tags_match(&tag, &tag[..15]));
    }

    // An all-ones block with r = 2 lands the accumulator at 2^130 - 2,
    // above the modulus, exercising the g = h + 5 selection in finalize.
    #[test]
    fn test_full_reduction_edge() {
        let mut key = [0u8; 32];
        key[0] = 2;
        let msg = [0xFFu8; 16];
        // h = (2^128 - 1 + 2^128) * 2 = 2^130 - 2, so the reduced value is
        // h - (2^130 - 5) = 3, and s is zero.
        let tag = authenticate(&key, &msg);
        let mut expected = [0u8; TAG_LEN];
        expected[0] = 3;
        assert_eq!(tag, expected);
    }
}
