use std::str::FromStr;

use crate::{bit_set::BitSet, discovery_error::DiscoveryError};

/// Reduces a batch of distinct difference sets to its minimal elements.
pub trait CalculateMinimalSetsStrategy: Send + Sync {
    fn calculate_minimal_sets(&self, unique: Vec<BitSet>) -> Vec<BitSet>;
}

/// Insert `set` into the antichain `minimal`: dropped when some member is a
/// subset of it, otherwise every member it is a subset of is evicted.
pub fn insert_minimal(minimal: &mut Vec<BitSet>, set: BitSet) {
    if minimal.iter().any(|m| m.is_subset_of(&set)) {
        return;
    }
    minimal.retain(|m| !set.is_subset_of(m));
    minimal.push(set);
}

/// Buckets by cardinality and walks buckets upwards.
///
/// A set can only be dominated by a set of smaller (or, for duplicates, equal)
/// cardinality. Walking upwards, everything found so far has cardinality at
/// most the current one, so nothing ever needs to be evicted.
pub struct BucketingMinimalSets {
    column_count: usize,
}

impl BucketingMinimalSets {
    pub fn new(column_count: usize) -> Self {
        Self { column_count }
    }
}

impl CalculateMinimalSetsStrategy for BucketingMinimalSets {
    fn calculate_minimal_sets(&self, unique: Vec<BitSet>) -> Vec<BitSet> {
        let mut buckets: Vec<Vec<BitSet>> = vec![Vec::new(); self.column_count + 1];
        for set in unique {
            let k = set.cardinality();
            if k >= buckets.len() {
                buckets.resize(k + 1, Vec::new());
            }
            buckets[k].push(set);
        }

        let mut minimal: Vec<BitSet> = Vec::new();
        for bucket in buckets {
            for set in bucket {
                if !minimal.iter().any(|m| m.is_subset_of(&set)) {
                    minimal.push(set);
                }
            }
        }
        minimal
    }
}

/// Sorts by cardinality, then inserts one by one.
pub struct SortingMinimalSets;

impl CalculateMinimalSetsStrategy for SortingMinimalSets {
    fn calculate_minimal_sets(&self, mut unique: Vec<BitSet>) -> Vec<BitSet> {
        unique.sort_by_key(|s| s.cardinality());
        let mut minimal = Vec::new();
        for set in unique {
            insert_minimal(&mut minimal, set);
        }
        minimal
    }
}

/// All-pairs reference implementation.
pub struct NaiveMinimalSets;

impl CalculateMinimalSetsStrategy for NaiveMinimalSets {
    fn calculate_minimal_sets(&self, unique: Vec<BitSet>) -> Vec<BitSet> {
        let keep: Vec<bool> = unique
            .iter()
            .enumerate()
            .map(|(i, s)| {
                unique.iter().enumerate().all(|(j, t)| {
                    // Equal sets: the first occurrence survives.
                    i == j || !t.is_subset_of(s) || (t == s && i < j)
                })
            })
            .collect();
        unique
            .into_iter()
            .zip(keep)
            .filter_map(|(s, k)| k.then_some(s))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MinimizeStrategyKind {
    #[default]
    Bucketing,
    Sort,
    Naive,
}

impl MinimizeStrategyKind {
    pub fn build(self, column_count: usize) -> Box<dyn CalculateMinimalSetsStrategy> {
        match self {
            MinimizeStrategyKind::Bucketing => Box::new(BucketingMinimalSets::new(column_count)),
            MinimizeStrategyKind::Sort => Box::new(SortingMinimalSets),
            MinimizeStrategyKind::Naive => Box::new(NaiveMinimalSets),
        }
    }
}

impl FromStr for MinimizeStrategyKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bucketing" => Ok(MinimizeStrategyKind::Bucketing),
            "sort" => Ok(MinimizeStrategyKind::Sort),
            "naive" => Ok(MinimizeStrategyKind::Naive),
            other => Err(DiscoveryError::Config(format!(
                "unknown minimize strategy {other:?}, expected one of [bucketing, sort, naive]"
            ))),
        }
    }
}
