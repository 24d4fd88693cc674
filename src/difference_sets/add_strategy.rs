use std::collections::HashSet;
use std::str::FromStr;

use crate::{bit_set::BitSet, discovery_error::DiscoveryError};

/// Cache for raw difference sets between two reductions.
pub trait AddDifferenceSetStrategy: Send + Sync {
    /// Returns true when `set` was not cached yet (best effort for list caches).
    fn add(&mut self, set: BitSet) -> bool;
    fn cached_count(&self) -> usize;
    /// Empty the cache, handing out each distinct set once.
    fn drain_unique(&mut self) -> Vec<BitSet>;
    fn reserve(&mut self, capacity: usize);
}

/// Deduplicates on insert.
#[derive(Default)]
pub struct HashAddStrategy {
    cache: HashSet<BitSet>,
}

impl AddDifferenceSetStrategy for HashAddStrategy {
    fn add(&mut self, set: BitSet) -> bool {
        self.cache.insert(set)
    }

    fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn drain_unique(&mut self) -> Vec<BitSet> {
        self.cache.drain().collect()
    }

    fn reserve(&mut self, capacity: usize) {
        self.cache.reserve(capacity.saturating_sub(self.cache.len()));
    }
}

/// Appends everything; duplicates are removed by sorting on drain.
#[derive(Default)]
pub struct ListAddStrategy {
    cache: Vec<BitSet>,
}

impl AddDifferenceSetStrategy for ListAddStrategy {
    fn add(&mut self, set: BitSet) -> bool {
        self.cache.push(set);
        true
    }

    fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn drain_unique(&mut self) -> Vec<BitSet> {
        let mut out = std::mem::take(&mut self.cache);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn reserve(&mut self, capacity: usize) {
        self.cache.reserve(capacity.saturating_sub(self.cache.len()));
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddStrategyKind {
    #[default]
    Hash,
    List,
}

impl AddStrategyKind {
    pub fn build(self) -> Box<dyn AddDifferenceSetStrategy> {
        match self {
            AddStrategyKind::Hash => Box::new(HashAddStrategy::default()),
            AddStrategyKind::List => Box::new(ListAddStrategy::default()),
        }
    }
}

impl FromStr for AddStrategyKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hash" => Ok(AddStrategyKind::Hash),
            "list" => Ok(AddStrategyKind::List),
            other => Err(DiscoveryError::Config(format!(
                "unknown add strategy {other:?}, expected one of [hash, list]"
            ))),
        }
    }
}
