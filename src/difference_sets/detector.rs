use crate::{
    bit_set::BitSet,
    difference_sets::{
        NullHandling,
        add_strategy::{AddDifferenceSetStrategy, AddStrategyKind},
        difference_set,
        merge::{MergeMinimalSetsStrategy, MergeStrategyKind},
        minimal::{CalculateMinimalSetsStrategy, MinimizeStrategyKind},
    },
};

/// Peer-local evidence store.
///
/// Raw difference sets accumulate in a cache; the cache is folded into the
/// current minimal antichain whenever it grows past `flush_threshold` and on
/// every read of [`minimal_difference_sets`](Self::minimal_difference_sets).
pub struct DifferenceSetDetector {
    add: Box<dyn AddDifferenceSetStrategy>,
    minimize: Box<dyn CalculateMinimalSetsStrategy>,
    merge: Box<dyn MergeMinimalSetsStrategy>,
    minimal: Vec<BitSet>,
    flush_threshold: usize,
    last_minimal_count: usize,
}

impl DifferenceSetDetector {
    pub fn new(
        add: Box<dyn AddDifferenceSetStrategy>,
        minimize: Box<dyn CalculateMinimalSetsStrategy>,
        merge: Box<dyn MergeMinimalSetsStrategy>,
        flush_threshold: usize,
    ) -> Self {
        Self {
            add,
            minimize,
            merge,
            minimal: Vec::new(),
            flush_threshold: flush_threshold.max(1),
            last_minimal_count: 0,
        }
    }

    pub fn from_kinds(
        column_count: usize,
        add: AddStrategyKind,
        minimize: MinimizeStrategyKind,
        merge: MergeStrategyKind,
        flush_threshold: usize,
    ) -> Self {
        Self::new(
            add.build(),
            minimize.build(column_count),
            merge.build(),
            flush_threshold,
        )
    }

    /// Compare two encoded rows and cache the resulting difference set.
    pub fn add_difference_set(&mut self, row_a: &[u32], row_b: &[u32], nulls: NullHandling) {
        self.add_set(difference_set(row_a, row_b, nulls));
    }

    pub fn add_set(&mut self, set: BitSet) {
        self.add.add(set);
        if self.add.cached_count() >= self.flush_threshold {
            self.flush();
        }
    }

    pub fn reserve(&mut self, capacity: usize) {
        self.add.reserve(capacity.min(self.flush_threshold));
    }

    fn flush(&mut self) {
        let unique = self.add.drain_unique();
        if unique.is_empty() {
            return;
        }
        let fresh = self.minimize.calculate_minimal_sets(unique);
        self.minimal = if self.minimal.is_empty() {
            fresh
        } else {
            self.merge.merge(&self.minimal, &fresh)
        };
        self.last_minimal_count = self.minimal.len();
    }

    /// Current minimal antichain, covering every set added so far.
    pub fn minimal_difference_sets(&mut self) -> Vec<BitSet> {
        self.flush();
        self.minimal.clone()
    }

    /// Fold an already minimal antichain (a colleague's evidence) into ours.
    pub fn absorb_minimal(&mut self, other: &[BitSet]) -> usize {
        self.flush();
        self.minimal = self.merge.merge(&self.minimal, other);
        self.last_minimal_count = self.minimal.len();
        self.minimal.len()
    }

    /// Replace the evidence wholesale (final synchronization).
    pub fn replace_minimal(&mut self, sets: Vec<BitSet>) {
        self.add.drain_unique();
        self.last_minimal_count = sets.len();
        self.minimal = sets;
    }

    pub fn cached_count(&self) -> usize {
        self.add.cached_count()
    }

    /// Minimal count as of the last reduction; reading it never reduces.
    pub fn last_counted_minimal_count(&self) -> usize {
        self.last_minimal_count
    }
}
