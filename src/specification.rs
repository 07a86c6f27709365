//! The informal specification of the sudokuwire frame and hint formats.

// Frame:
// ```text
// | len | body     |
// | 2B  | variable |
//
// body, cipher = chacha20-poly1305:
// | ciphertext | tag |
// |  variable  | 16B |
//
// body, cipher = aes-128-gcm:
// | nonce | ciphertext | tag |
// |  12B  |  variable  | 16B |
//
// body, cipher = none:
// | plaintext |
// ```
//
// The length prefix is big-endian. The chacha20-poly1305 nonce is implicit:
// `key[0..4] || big_endian_u64(counter)`, counter incremented before use, so
// the first frame of a direction uses counter 1. The aes-128-gcm nonce is
// random per frame and travels in the body.
pub(crate) const LEN_PREFIX_LEN: usize = 2;
pub(crate) const FRAME_BODY_MAX_LEN: usize = 65535;
pub(crate) const TAG_LEN: usize = 16;
pub(crate) const NONCE_LEN: usize = 12;
pub(crate) const KEY_LEN: usize = 32;

/// Senders slice plaintext into frames of at most this size, which keeps the
/// worst-case mask expansion of one frame under [`MASK_OUTPUT_CEILING`].
pub(crate) const PAYLOAD_CHUNK_LEN: usize = 16384;

// Masked hint stream:
// ```text
// | pad* | h0 | pad* | h1 | pad* | h2 | pad* | h3 | pad* | ...
// ```
// Each plaintext byte expands into one hint quadruple `h0..h3` (in a permuted
// order), interleaved with optional padding bytes drawn from the padding pool.
// A hint byte packs a cell value and a grid position:
// ```text
// | 1 0 | v v | p p p p |
// ```
pub(crate) const HINT_BASE: u8 = 0x80;
pub(crate) const HINT_CLASS_MASK: u8 = 0xC0;
pub(crate) const HINT_VALUE_MASK: u8 = 0x30;

/// Upper bound on the masked size of `n` plaintext bytes.
pub(crate) const fn mask_output_bound(n: usize) -> usize {
    n * 6 + 32
}

/// Per-call ceiling on mask output growth.
pub(crate) const MASK_OUTPUT_CEILING: usize = 128 * 1024;

pub(crate) const NUM_GRIDS: usize = 288;
pub(crate) const NUM_POSITION_COMBOS: usize = 1820;
pub(crate) const MAX_HINTS_PER_BYTE: usize = 50;

/// Padding marker byte of the ASCII layout (`?`).
#[allow(unused)]
pub(crate) const PAD_MARKER: u8 = 0x3F;

/// Session tokens are 16 random bytes, presented as lowercase hex.
pub(crate) const TOKEN_LEN: usize = 16;
