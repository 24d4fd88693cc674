//! Difference-set evidence: one bit vector per compared row pair, reduced to a
//! minimal antichain under set containment.
//!
//! The store is assembled from three exchangeable parts: how raw sets are
//! cached ([`add_strategy`]), how a cache is reduced to its minimal elements
//! ([`minimal`]), and how two minimal antichains are merged ([`merge`]).

pub mod add_strategy;
pub mod detector;
pub mod merge;
pub mod minimal;

use bincode::{Decode, Encode};

use crate::{bit_set::BitSet, dictionary::NULL_CODE};

pub use detector::DifferenceSetDetector;

/// Whether two absent cells count as equal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub enum NullHandling {
    NullEqualsNull,
    #[default]
    NullNotEqualsNull,
}

/// Columns on which two encoded rows can be told apart.
pub fn difference_set(row_a: &[u32], row_b: &[u32], nulls: NullHandling) -> BitSet {
    let width = row_a.len().max(row_b.len());
    let mut set = BitSet::new(width);
    for i in 0..width {
        let a = row_a.get(i).copied().unwrap_or(NULL_CODE);
        let b = row_b.get(i).copied().unwrap_or(NULL_CODE);
        let same = a == b && (a != NULL_CODE || nulls == NullHandling::NullEqualsNull);
        if !same {
            set.set(i);
        }
    }
    set
}

/// True when no element of `sets` contains another one.
pub fn is_antichain(sets: &[BitSet]) -> bool {
    sets.iter().enumerate().all(|(i, a)| {
        sets.iter()
            .enumerate()
            .all(|(j, b)| i == j || !a.is_subset_of(b))
    })
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::bit_set::BitSet;

    pub fn bits(b: &[u8]) -> BitSet {
        BitSet::from_bits(b)
    }

    pub fn sorted(mut v: Vec<BitSet>) -> Vec<BitSet> {
        v.sort();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_util::bits;

    #[test]
    fn differing_columns_are_marked() {
        assert_eq!(
            difference_set(&[1, 2, 3], &[1, 5, 3], NullHandling::default()),
            bits(&[0, 1, 0])
        );
    }

    #[test]
    fn null_policy_decides_null_pairs() {
        let a = [NULL_CODE, 4];
        let b = [NULL_CODE, 4];
        assert_eq!(difference_set(&a, &b, NullHandling::NullEqualsNull), bits(&[0, 0]));
        assert_eq!(difference_set(&a, &b, NullHandling::NullNotEqualsNull), bits(&[1, 0]));
    }

    #[test]
    fn antichain_check() {
        assert!(is_antichain(&[bits(&[1, 0]), bits(&[0, 1])]));
        assert!(!is_antichain(&[bits(&[1, 0]), bits(&[1, 1])]));
        assert!(!is_antichain(&[bits(&[1, 0]), bits(&[1, 0])]));
    }
}
