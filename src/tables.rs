//! Codec tables: the 288 valid 4x4 Sudoku grids, the C(16,4) = 1820 position
//! combinations, and the keyed encode/decode tables built from them.
//!
//! Tables are immutable after derivation and shared read-only by every
//! session using the same key. Derivation is cached process-wide.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use crate::specification::{
    HINT_BASE, HINT_CLASS_MASK, HINT_VALUE_MASK, KEY_LEN, MAX_HINTS_PER_BYTE, NUM_GRIDS,
    NUM_POSITION_COMBOS,
};

/// Derived tables, cached by their key seed.
///
/// Both tunnel endpoints derive identical tables from the shared key, which
/// is what makes the hint stream decodable without sharing RNG state.
static TABLE_CACHE: LazyLock<Mutex<HashMap<u32, Arc<CodecTables>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Padding bytes: 16 printable ASCII bytes (`0`..`?`), none of which is a
/// hint candidate. Includes the ASCII-layout padding marker `?`.
pub(crate) const PADDING_POOL: [u8; 16] = [
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E,
    0x3F,
];

/// All permutations of four elements, used to scramble hint emission order.
pub(crate) const PERM4: [[u8; 4]; 24] = [
    [0, 1, 2, 3], [0, 1, 3, 2], [0, 2, 1, 3], [0, 2, 3, 1],
    [0, 3, 1, 2], [0, 3, 2, 1], [1, 0, 2, 3], [1, 0, 3, 2],
    [1, 2, 0, 3], [1, 2, 3, 0], [1, 3, 0, 2], [1, 3, 2, 0],
    [2, 0, 1, 3], [2, 0, 3, 1], [2, 1, 0, 3], [2, 1, 3, 0],
    [2, 3, 0, 1], [2, 3, 1, 0], [3, 0, 1, 2], [3, 0, 2, 1],
    [3, 1, 0, 2], [3, 1, 2, 0], [3, 2, 0, 1], [3, 2, 1, 0],
];

/// A byte is a hint candidate iff its class bits are `10` and its value
/// field is nonzero. Everything else in a masked stream is padding.
#[inline]
pub(crate) fn is_hint_candidate(b: u8) -> bool {
    (b & HINT_CLASS_MASK) == HINT_BASE && (b & HINT_VALUE_MASK) != 0
}

/// Sorts a quadruple with a fixed five-swap network and packs it into the
/// decode-table key. Sorting makes the key independent of emission order.
pub(crate) fn pack_hints(mut h: [u8; 4]) -> u32 {
    if h[0] > h[1] {
        h.swap(0, 1);
    }
    if h[2] > h[3] {
        h.swap(2, 3);
    }
    if h[0] > h[2] {
        h.swap(0, 2);
    }
    if h[1] > h[3] {
        h.swap(1, 3);
    }
    if h[1] > h[2] {
        h.swap(1, 2);
    }
    u32::from(h[0]) << 24 | u32::from(h[1]) << 16 | u32::from(h[2]) << 8 | u32::from(h[3])
}

/// The 32-bit linear congruential generator shared by table derivation and
/// the masking path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Lcg32 {
    state: u32,
}

impl Lcg32 {
    /// Seeds from the key's first 8 bytes, read big-endian and folded down
    /// to 32 bits. An all-zero key seeds state 0.
    pub(crate) fn from_key(key: &[u8; KEY_LEN]) -> Self {
        let seed = u64::from_be_bytes(key[..8].try_into().unwrap());
        Self {
            state: ((seed >> 32) ^ seed) as u32,
        }
    }

    /// The current state, used for threshold comparisons without advancing.
    #[inline]
    pub(crate) fn peek(&self) -> u32 {
        self.state
    }

    /// One LCG step; returns the new state.
    #[inline]
    pub(crate) fn advance(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1664525).wrapping_add(1013904223);
        self.state
    }
}

/// Immutable, keyed encode/decode tables.
pub(crate) struct CodecTables {
    /// Per byte value, up to 50 hint quadruples in position order.
    encode: Vec<Vec<[u8; 4]>>,
    /// Packed sorted quadruple -> original byte.
    decode: HashMap<u32, u8>,
}

impl CodecTables {
    /// Returns the tables for `key`, deriving and caching them on first use.
    pub(crate) fn for_key(key: &[u8; KEY_LEN]) -> Arc<CodecTables> {
        let seed = Lcg32::from_key(key).peek();
        let mut cache = TABLE_CACHE.lock().expect("table cache poisoned");
        Arc::clone(
            cache
                .entry(seed)
                .or_insert_with(|| Arc::new(Self::build(Lcg32 { state: seed }))),
        )
    }

    pub(crate) fn encode_entries(&self, b: u8) -> &[[u8; 4]] {
        &self.encode[b as usize]
    }

    pub(crate) fn decode(&self, packed: u32) -> Option<u8> {
        self.decode.get(&packed).copied()
    }

    fn build(mut rng: Lcg32) -> CodecTables {
        let grids = generate_grids();
        let combos = position_combos();
        debug_assert_eq!(grids.len(), NUM_GRIDS);
        debug_assert_eq!(combos.len(), NUM_POSITION_COMBOS);

        // For every combination, count how many grids share each possible
        // value signature at those positions. A quadruple is usable only if
        // its signature pins down exactly one grid.
        let mut combo_counts = vec![[0u16; 256]; combos.len()];
        for (counts, combo) in combo_counts.iter_mut().zip(combos.iter()) {
            for grid in &grids {
                counts[signature(grid, combo)] += 1;
            }
        }

        // Fisher-Yates over the grid order, keyed by the session key.
        let mut order: Vec<usize> = (0..NUM_GRIDS).collect();
        for i in (1..NUM_GRIDS).rev() {
            let j = rng.advance() as usize % (i + 1);
            order.swap(i, j);
        }

        let mut encode = vec![Vec::new(); 256];
        let mut decode = HashMap::new();
        for (b, slots) in encode.iter_mut().enumerate() {
            let grid = &grids[order[b]];
            for (ci, combo) in combos.iter().enumerate() {
                if slots.len() == MAX_HINTS_PER_BYTE {
                    break;
                }

                let mut hints = [0u8; 4];
                let mut usable = true;
                for (k, &p) in combo.iter().enumerate() {
                    let v = grid[p as usize] - 1;
                    // A zero value field would make the hint byte
                    // indistinguishable from padding on the receive side.
                    if v == 0 {
                        usable = false;
                        break;
                    }
                    hints[k] = HINT_BASE | (v << 4) | p;
                }
                if !usable || combo_counts[ci][signature(grid, combo)] != 1 {
                    continue;
                }

                slots.push(hints);
                decode.insert(pack_hints(hints), b as u8);
            }
        }

        CodecTables { encode, decode }
    }
}

impl core::fmt::Debug for CodecTables {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CodecTables")
            .field("decode_entries", &self.decode.len())
            .finish_non_exhaustive()
    }
}

/// Packs the (biased) values of `grid` at the combination's positions into
/// an 8-bit signature.
#[inline]
fn signature(grid: &[u8; 16], combo: &[u8; 4]) -> usize {
    let mut sig = 0usize;
    for &p in combo {
        sig = sig << 2 | (grid[p as usize] - 1) as usize;
    }
    sig
}

/// Generates all 288 valid 4x4 Sudoku grids by backtracking over rows,
/// columns and the four 2x2 boxes.
fn generate_grids() -> Vec<[u8; 16]> {
    fn backtrack(idx: usize, grid: &mut [u8; 16], out: &mut Vec<[u8; 16]>) {
        if idx == 16 {
            out.push(*grid);
            return;
        }
        let (row, col) = (idx / 4, idx % 4);
        let (br, bc) = ((row / 2) * 2, (col / 2) * 2);
        'num: for num in 1..=4u8 {
            for i in 0..4 {
                if grid[row * 4 + i] == num || grid[i * 4 + col] == num {
                    continue 'num;
                }
            }
            for r in 0..2 {
                for c in 0..2 {
                    if grid[(br + r) * 4 + (bc + c)] == num {
                        continue 'num;
                    }
                }
            }
            grid[idx] = num;
            backtrack(idx + 1, grid, out);
            grid[idx] = 0;
        }
    }

    let mut out = Vec::with_capacity(NUM_GRIDS);
    backtrack(0, &mut [0u8; 16], &mut out);
    out
}

/// The 1820 four-position combinations of a 16-cell grid, in lexicographic
/// order.
fn position_combos() -> Vec<[u8; 4]> {
    let mut out = Vec::with_capacity(NUM_POSITION_COMBOS);
    for p0 in 0..16u8 {
        for p1 in p0 + 1..16 {
            for p2 in p1 + 1..16 {
                for p3 in p2 + 1..16 {
                    out.push([p0, p1, p2, p3]);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_grid_and_combo_counts() {
        assert_eq!(generate_grids().len(), NUM_GRIDS);
        assert_eq!(position_combos().len(), NUM_POSITION_COMBOS);
    }

    #[test]
    fn test_generated_grids_are_valid() {
        for grid in generate_grids() {
            for row in 0..4 {
                let mut seen = [false; 5];
                for col in 0..4 {
                    seen[grid[row * 4 + col] as usize] = true;
                }
                assert_eq!(seen[1..], [true; 4]);
            }
            for col in 0..4 {
                let mut seen = [false; 5];
                for row in 0..4 {
                    seen[grid[row * 4 + col] as usize] = true;
                }
                assert_eq!(seen[1..], [true; 4]);
            }
        }
    }

    #[test]
    fn test_padding_pool_is_not_hint_space() {
        assert_eq!(PADDING_POOL.len(), 16);
        for b in PADDING_POOL {
            assert!((0x20..=0x3F).contains(&b));
            assert!(!is_hint_candidate(b));
        }
    }

    #[test]
    fn test_every_byte_has_encode_entries() {
        for key in [[0u8; 32], [0xA7u8; 32]] {
            let tables = CodecTables::for_key(&key);
            for b in 0..=255u8 {
                let entries = tables.encode_entries(b);
                assert!(!entries.is_empty(), "byte {b} has no quadruples");
                assert!(entries.len() <= MAX_HINTS_PER_BYTE);
            }
        }
    }

    #[test]
    fn test_encode_entries_decode_in_any_order() {
        let tables = CodecTables::for_key(&[0u8; 32]);
        for b in (0..=255u8).step_by(17) {
            for hints in tables.encode_entries(b) {
                for perm in PERM4 {
                    let shuffled = [
                        hints[perm[0] as usize],
                        hints[perm[1] as usize],
                        hints[perm[2] as usize],
                        hints[perm[3] as usize],
                    ];
                    assert_eq!(tables.decode(pack_hints(shuffled)), Some(b));
                }
            }
        }
    }

    #[test]
    fn test_hint_bytes_satisfy_predicate() {
        let tables = CodecTables::for_key(&[3u8; 32]);
        for b in 0..=255u8 {
            for hints in tables.encode_entries(b) {
                for &h in hints {
                    assert!(is_hint_candidate(h));
                }
            }
        }
    }

    #[test]
    fn test_decode_keys_are_collision_free() {
        let tables = CodecTables::for_key(&[0u8; 32]);
        let total: usize = (0..=255u8).map(|b| tables.encode_entries(b).len()).sum();
        assert_eq!(tables.decode.len(), total);
    }

    #[test]
    fn test_different_keys_give_different_orders() {
        let a = CodecTables::for_key(&[0u8; 32]);
        let b = CodecTables::for_key(&[0x55u8; 32]);
        let differs = (0..=255u8).any(|v| a.encode_entries(v) != b.encode_entries(v));
        assert!(differs);
    }

    #[test]
    fn test_table_cache_returns_shared_instance() {
        let a = CodecTables::for_key(&[9u8; 32]);
        let b = CodecTables::for_key(&[9u8; 32]);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lcg_zero_key_seeds_zero() {
        assert_eq!(Lcg32::from_key(&[0u8; 32]).peek(), 0);
    }
}
