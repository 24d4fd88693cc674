pub mod protocol;
pub mod state;
pub mod tree_search;
pub mod worker;

pub use protocol::{Command, Member, PeerMsg, Role, SearchSummary};
pub use state::{WorkerState, has_priority};
pub use worker::{PeerConfig, PeerWorker};
