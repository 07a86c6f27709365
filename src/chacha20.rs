//! ChaCha20 stream cipher, IETF variant (RFC 8439).
//!
//! 256-bit key, 96-bit nonce, 32-bit block counter, 64-byte blocks.

use crate::error::CryptoFailure;
use crate::specification::{KEY_LEN, NONCE_LEN};

pub(crate) const BLOCK_LEN: usize = 64;

/// The constants "expand 32-byte k" as four little-endian words.
const CONSTANTS: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// ChaCha20 cipher state.
///
/// The keystream position is byte-granular: unused bytes of the last
/// generated block are buffered, so [`xor_in_place`] may be called with
/// arbitrary slice lengths and the cursor carries across calls.
///
/// [`xor_in_place`]: ChaCha20::xor_in_place
#[derive(Clone)]
pub(crate) struct ChaCha20 {
    key: [u32; 8],
    counter: u32,
    nonce: [u32; 3],

    buf: [u8; BLOCK_LEN],
    buf_len: usize,
}

impl ChaCha20 {
    /// Loads the 16-word state. The counter starts at 1; block 0 is reserved
    /// for the Poly1305 one-time key (see [`poly1305_key`]).
    ///
    /// Fails on a wrong key or nonce length before any state is built.
    ///
    /// [`poly1305_key`]: ChaCha20::poly1305_key
    pub(crate) fn new(key: &[u8], nonce: &[u8]) -> Result<Self, CryptoFailure> {
        if key.len() != KEY_LEN {
            return Err(CryptoFailure::BadKeyOrNonceLength {
                received: key.len(),
            });
        }
        if nonce.len() != NONCE_LEN {
            return Err(CryptoFailure::BadKeyOrNonceLength {
                received: nonce.len(),
            });
        }

        let mut k = [0u32; 8];
        for (i, w) in k.iter_mut().enumerate() {
            *w = u32::from_le_bytes(key[i * 4..i * 4 + 4].try_into().unwrap());
        }
        let mut n = [0u32; 3];
        for (i, w) in n.iter_mut().enumerate() {
            *w = u32::from_le_bytes(nonce[i * 4..i * 4 + 4].try_into().unwrap());
        }

        Ok(Self {
            key: k,
            counter: 1,
            nonce: n,
            buf: [0u8; BLOCK_LEN],
            buf_len: 0,
        })
    }

    /// Repositions the block counter and discards any buffered keystream.
    pub(crate) fn set_counter(&mut self, counter: u32) {
        self.counter = counter;
        self.buf_len = 0;
    }

    /// Produces one keystream block and advances the counter.
    fn keystream_block(&mut self, out: &mut [u8; BLOCK_LEN]) {
        let mut s = [0u32; 16];
        s[..4].copy_from_slice(&CONSTANTS);
        s[4..12].copy_from_slice(&self.key);
        s[12] = self.counter;
        s[13..].copy_from_slice(&self.nonce);

        let initial = s;
        for _ in 0..10 {
            // column round
            quarter_round(&mut s, 0, 4, 8, 12);
            quarter_round(&mut s, 1, 5, 9, 13);
            quarter_round(&mut s, 2, 6, 10, 14);
            quarter_round(&mut s, 3, 7, 11, 15);
            // diagonal round
            quarter_round(&mut s, 0, 5, 10, 15);
            quarter_round(&mut s, 1, 6, 11, 12);
            quarter_round(&mut s, 2, 7, 8, 13);
            quarter_round(&mut s, 3, 4, 9, 14);
        }

        for (i, word) in s.iter().enumerate() {
            let w = word.wrapping_add(initial[i]);
            out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        self.counter = self.counter.wrapping_add(1);
    }

    /// XORs `data` with the keystream in place.
    ///
    /// Leftover keystream from a previous call is consumed first, so chunked
    /// calls produce the same bytes as one call over the concatenation.
    pub(crate) fn xor_in_place(&mut self, data: &mut [u8]) {
        let mut pos = 0;

        // Drain the buffered keystream tail first.
        if self.buf_len > 0 {
            let start = BLOCK_LEN - self.buf_len;
            let n = core::cmp::min(self.buf_len, data.len());
            for i in 0..n {
                data[i] ^= self.buf[start + i];
            }
            self.buf_len -= n;
            pos = n;
        }

        // Whole blocks.
        let mut block = [0u8; BLOCK_LEN];
        while data.len() - pos >= BLOCK_LEN {
            self.keystream_block(&mut block);
            for (d, k) in data[pos..pos + BLOCK_LEN].iter_mut().zip(block.iter()) {
                *d ^= k;
            }
            pos += BLOCK_LEN;
        }

        // Partial tail; keep the unused keystream for the next call.
        if pos < data.len() {
            self.keystream_block(&mut block);
            self.buf = block;
            let rest = data.len() - pos;
            for (i, d) in data[pos..].iter_mut().enumerate() {
                *d ^= self.buf[i];
            }
            self.buf_len = BLOCK_LEN - rest;
        }
    }

    /// Derives the Poly1305 one-time key: the first 32 bytes of block 0.
    ///
    /// Leaves the counter at 1 so a subsequent [`xor_in_place`] encrypts the
    /// payload with the remaining keystream as RFC 8439 lays it out.
    ///
    /// [`xor_in_place`]: ChaCha20::xor_in_place
    pub(crate) fn poly1305_key(&mut self) -> [u8; 32] {
        self.set_counter(0);
        let mut block = [0u8; BLOCK_LEN];
        self.keystream_block(&mut block);

        let mut out = [0u8; 32];
        out.copy_from_slice(&block[..32]);
        self.set_counter(1);
        out
    }
}

impl core::fmt::Debug for ChaCha20 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChaCha20")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

#[inline]
fn quarter_round(s: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    s[a] = s[a].wrapping_add(s[b]);
    s[d] ^= s[a];
    s[d] = s[d].rotate_left(16);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] ^= s[c];
    s[b] = s[b].rotate_left(12);
    s[a] = s[a].wrapping_add(s[b]);
    s[d] ^= s[a];
    s[d] = s[d].rotate_left(8);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] ^= s[c];
    s[b] = s[b].rotate_left(7);
}
