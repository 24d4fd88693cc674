use bincode::{Decode, Encode};

use crate::bit_set::BitSet;

/// Verdict for one node `(X, Y, next)` of the search tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum OracleStatus {
    /// X is a minimal unique column combination.
    Minimal,
    /// Branch on column `next`.
    Extendable,
    /// No minimal UCC below this node.
    NotExtendable,
    /// Inputs were inconsistent.
    Failed,
}

/// Classifies search nodes. Must be a pure function of its arguments.
pub trait DecisionOracle: Send + Sync + 'static {
    fn classify(
        &self,
        x: &BitSet,
        y: &BitSet,
        next: usize,
        evidence: &[BitSet],
        column_count: usize,
    ) -> OracleStatus;
}

/// UCCs are the minimal hitting sets of the minimal difference sets. A node
/// is pruned once one of the following can no longer change by adding
/// columns at or after `next`:
///
/// - some set missed by X lies entirely in Y (it can never be hit);
/// - some column of X has no set meeting X in that column alone (it can
///   never become necessary).
pub struct HittingSetOracle;

impl DecisionOracle for HittingSetOracle {
    fn classify(
        &self,
        x: &BitSet,
        y: &BitSet,
        next: usize,
        evidence: &[BitSet],
        column_count: usize,
    ) -> OracleStatus {
        if next > column_count
            || x.intersects(y)
            || x.ones().chain(y.ones()).any(|c| c >= column_count)
            || evidence.iter().any(|s| s.ones().any(|c| c >= column_count))
        {
            return OracleStatus::Failed;
        }

        // critical[c]: column c of X is the only X column of some set.
        let mut critical = vec![false; column_count];
        let mut all_hit = true;
        for set in evidence {
            match set.intersection_count(x) {
                0 => {
                    if set.is_subset_of(y) {
                        return OracleStatus::NotExtendable;
                    }
                    all_hit = false;
                }
                1 => {
                    if let Some(c) = set.ones().find(|c| x.get(*c)) {
                        if c < column_count {
                            critical[c] = true;
                        }
                    }
                }
                _ => {}
            }
        }

        if x.ones().any(|c| !critical[c]) {
            return OracleStatus::NotExtendable;
        }
        if all_hit {
            return OracleStatus::Minimal;
        }
        if next >= column_count {
            return OracleStatus::NotExtendable;
        }
        OracleStatus::Extendable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit_set::BitSet;

    fn set(len: usize, cols: &[usize]) -> BitSet {
        BitSet::from_indices(len, cols.iter().copied())
    }

    /// Walk the whole tree sequentially and collect MINIMAL nodes.
    fn enumerate(evidence: &[BitSet], n: usize) -> Vec<Vec<usize>> {
        let mut out = Vec::new();
        let mut stack = vec![(BitSet::new(n), BitSet::new(n), 0usize)];
        while let Some((x, y, next)) = stack.pop() {
            match HittingSetOracle.classify(&x, &y, next, evidence, n) {
                OracleStatus::Minimal => out.push(x.ones().collect()),
                OracleStatus::Extendable => {
                    let mut xn = x.copy_with_len(n);
                    xn.set(next);
                    let mut yn = y.copy_with_len(n);
                    yn.set(next);
                    stack.push((xn, y, next + 1));
                    stack.push((x, yn, next + 1));
                }
                OracleStatus::NotExtendable => {}
                OracleStatus::Failed => panic!("oracle failed"),
            }
        }
        out.sort();
        out
    }

    #[test]
    fn minimal_hitting_sets_are_enumerated_once() {
        // {0}, {1,2}: the minimal hitting sets are {0,1} and {0,2}.
        let ev = vec![set(3, &[0]), set(3, &[1, 2])];
        assert_eq!(enumerate(&ev, 3), vec![vec![0, 1], vec![0, 2]]);
    }

    #[test]
    fn single_unique_column() {
        let ev = vec![set(2, &[0])];
        assert_eq!(enumerate(&ev, 2), vec![vec![0]]);
    }

    #[test]
    fn no_evidence_means_the_empty_combination_is_unique() {
        assert_eq!(enumerate(&[], 3), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn duplicate_rows_leave_nothing() {
        let ev = vec![BitSet::new(2)];
        assert!(enumerate(&ev, 2).is_empty());
    }

    #[test]
    fn root_of_nontrivial_evidence_is_extendable() {
        let ev = vec![set(3, &[0, 1])];
        let s = HittingSetOracle.classify(&BitSet::new(3), &BitSet::new(3), 0, &ev, 3);
        assert_eq!(s, OracleStatus::Extendable);
    }

    #[test]
    fn redundant_column_prunes() {
        let ev = vec![set(3, &[0, 1])];
        let s = HittingSetOracle.classify(&set(3, &[0, 1]), &BitSet::new(3), 2, &ev, 3);
        assert_eq!(s, OracleStatus::NotExtendable);
    }

    #[test]
    fn unhittable_set_prunes() {
        let ev = vec![set(3, &[0, 1]), set(3, &[2])];
        let s = HittingSetOracle.classify(&set(3, &[2]), &set(3, &[0, 1]), 2, &ev, 3);
        assert_eq!(s, OracleStatus::NotExtendable);
    }

    #[test]
    fn overlapping_x_and_y_fail() {
        let s = HittingSetOracle.classify(&set(2, &[0]), &set(2, &[0]), 1, &[], 2);
        assert_eq!(s, OracleStatus::Failed);
        let s = HittingSetOracle.classify(&BitSet::new(2), &BitSet::new(2), 3, &[], 2);
        assert_eq!(s, OracleStatus::Failed);
    }

    #[test]
    fn evidence_wider_than_the_table_fails() {
        let ev = vec![set(5, &[4])];
        let s = HittingSetOracle.classify(&BitSet::new(2), &BitSet::new(2), 0, &ev, 2);
        assert_eq!(s, OracleStatus::Failed);

        // Width alone is fine as long as no column past the table is set.
        let ev = vec![set(5, &[1])];
        let s = HittingSetOracle.classify(&BitSet::new(2), &BitSet::new(2), 0, &ev, 2);
        assert_eq!(s, OracleStatus::Extendable);
    }
}
