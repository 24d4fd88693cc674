use std::str::FromStr;

use crate::{bit_set::BitSet, discovery_error::DiscoveryError};

/// Merges two minimal antichains into the minimal antichain of their union.
/// Implementations agree on the resulting set; order is unspecified.
pub trait MergeMinimalSetsStrategy: Send + Sync {
    fn merge(&self, a: &[BitSet], b: &[BitSet]) -> Vec<BitSet>;
}

/// Checks every element against every element of the other side.
pub struct TwoSidedMerge;

impl MergeMinimalSetsStrategy for TwoSidedMerge {
    fn merge(&self, a: &[BitSet], b: &[BitSet]) -> Vec<BitSet> {
        let mut out = Vec::with_capacity(a.len() + b.len());
        // Sets present on both sides are kept from `a` only.
        for x in a {
            if !b.iter().any(|y| y != x && y.is_subset_of(x)) {
                out.push(x.clone());
            }
        }
        for y in b {
            if !a.iter().any(|x| x.is_subset_of(y)) {
                out.push(y.clone());
            }
        }
        out
    }
}

/// Inserts `b` into `a`. Since `b` is itself minimal, its elements only ever
/// need comparing against the surviving elements of `a`.
pub struct OneSidedMerge;

impl MergeMinimalSetsStrategy for OneSidedMerge {
    fn merge(&self, a: &[BitSet], b: &[BitSet]) -> Vec<BitSet> {
        let mut alive = vec![true; a.len()];
        let mut added: Vec<BitSet> = Vec::new();
        'next: for y in b {
            for (i, x) in a.iter().enumerate() {
                if alive[i] && x.is_subset_of(y) {
                    continue 'next;
                }
            }
            for (i, x) in a.iter().enumerate() {
                if alive[i] && y.is_subset_of(x) {
                    alive[i] = false;
                }
            }
            added.push(y.clone());
        }
        a.iter()
            .zip(alive)
            .filter_map(|(x, keep)| keep.then(|| x.clone()))
            .chain(added)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeStrategyKind {
    #[default]
    TwoSided,
    OneSided,
}

impl MergeStrategyKind {
    pub fn build(self) -> Box<dyn MergeMinimalSetsStrategy> {
        match self {
            MergeStrategyKind::TwoSided => Box::new(TwoSidedMerge),
            MergeStrategyKind::OneSided => Box::new(OneSidedMerge),
        }
    }
}

impl FromStr for MergeStrategyKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "twosided" => Ok(MergeStrategyKind::TwoSided),
            "onesided" => Ok(MergeStrategyKind::OneSided),
            other => Err(DiscoveryError::Config(format!(
                "unknown merge strategy {other:?}, expected one of [two-sided, one-sided]"
            ))),
        }
    }
}
