use bincode::{Decode, Encode};
use std::fmt;

const WORD_BITS: usize = 64;

/// Bit vector over column indices.
///
/// `len` is the logical width (the table's column count); `set` past the end
/// grows the vector. Two sets are equal when width and bits agree, which holds
/// for all sets produced within one table.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct BitSet {
    len: usize,
    words: Vec<u64>,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(WORD_BITS)],
        }
    }

    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut s = Self::new(len);
        for i in indices {
            s.set(i);
        }
        s
    }

    /// Width `bits.len()`, bit `i` set iff `bits[i]` is non-zero.
    pub fn from_bits(bits: &[u8]) -> Self {
        Self::from_indices(
            bits.len(),
            bits.iter()
                .enumerate()
                .filter(|(_, b)| **b != 0)
                .map(|(i, _)| i),
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn set(&mut self, i: usize) {
        if i >= self.len {
            self.len = i + 1;
            self.words.resize(self.len.div_ceil(WORD_BITS), 0);
        }
        self.words[i / WORD_BITS] |= 1 << (i % WORD_BITS);
    }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        i < self.len && self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0
    }

    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self ⊆ other` (non-strict).
    pub fn is_subset_of(&self, other: &BitSet) -> bool {
        self.words.iter().enumerate().all(|(i, w)| {
            let o = other.words.get(i).copied().unwrap_or(0);
            w & !o == 0
        })
    }

    pub fn intersects(&self, other: &BitSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Size of `self ∩ other`.
    pub fn intersection_count(&self, other: &BitSet) -> usize {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// Copy widened (or narrowed) to `len`; bits past `len` are dropped.
    pub fn copy_with_len(&self, len: usize) -> BitSet {
        BitSet::from_indices(len, self.ones().filter(|i| *i < len))
    }

    /// Indices of the set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, w)| {
            let mut w = *w;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(wi * WORD_BITS + bit)
            })
        })
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}
