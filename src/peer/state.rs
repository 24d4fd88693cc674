use bincode::{Decode, Encode};
use std::fmt;

use crate::communication::transports::PeerId;

/// Lifecycle of one worker, as announced to its colleagues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Encode, Decode)]
pub enum WorkerState {
    #[default]
    NotStarted,
    DiscoveringDifferenceSets,
    ReadyToMerge,
    WaitingForMerge,
    AcceptedMerge,
    Merging,
    DoneMerging,
    TreeTraversal,
    Done,
}

impl WorkerState {
    /// States in which an incoming merge request is accepted. A peer that
    /// already accepted someone is bound to that asker until its evidence or
    /// its decline arrives.
    pub fn accepts_merge_request(self) -> bool {
        matches!(self, WorkerState::ReadyToMerge | WorkerState::WaitingForMerge)
    }

    /// States that satisfy the global "merging finished" check.
    pub fn is_settled(self) -> bool {
        matches!(self, WorkerState::DoneMerging | WorkerState::NotStarted)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::NotStarted => "NOT_STARTED",
            WorkerState::DiscoveringDifferenceSets => "DISCOVERING_DIFFERENCE_SETS",
            WorkerState::ReadyToMerge => "READY_TO_MERGE",
            WorkerState::WaitingForMerge => "WAITING_FOR_MERGE",
            WorkerState::AcceptedMerge => "ACCEPTED_MERGE",
            WorkerState::Merging => "MERGING",
            WorkerState::DoneMerging => "DONE_MERGING",
            WorkerState::TreeTraversal => "TREE_TRAVERSAL",
            WorkerState::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Negotiation priority: the byte-wise smaller id wins.
///
/// A peer only asks colleagues that do not have priority over it, so of two
/// mutually ready peers only the smaller one initiates.
#[inline]
pub fn has_priority(p: &PeerId, q: &PeerId) -> bool {
    p < q
}
