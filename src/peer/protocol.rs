use async_trait::async_trait;
use bincode::{Decode, Encode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    bit_set::BitSet,
    communication::{
        fnv1a_16,
        router::{Handler, Router, RouterError},
        transports::PeerId,
    },
    difference_sets::NullHandling,
    peer::{state::WorkerState, tree_search::ParentRef},
    tables::{BatchId, Row},
};

pub const PROTO_PEER: u16 = fnv1a_16("hitucc.peer.v1");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Role {
    Worker,
    DataSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Member {
    pub id: PeerId,
    pub role: Role,
}

/// Reported once by the peer owning the search root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Encode, Decode)]
pub struct SearchSummary {
    pub ucc_count: u64,
    pub tree_search_millis: u64,
}

/*──────── Envelope payloads ───────*/
#[derive(Clone, Debug, Encode, Decode)]
pub enum PeerMsg {
    Registration {
        role: Role,
    },

    /*── data source ⇄ worker ──*/
    FindDifferenceSetFromBatch {
        tasks: Vec<(BatchId, BatchId)>,
        batch_count: u32,
        column_count: u32,
        null_handling: NullHandling,
    },
    RequestDataBatch {
        batch_id: BatchId,
        split: u32,
    },
    SendDataBatch {
        batch_id: BatchId,
        rows: Vec<Row>,
        split: u32,
        split_count: u32,
    },

    /*── merge negotiation ──*/
    WorkerStateChanged {
        state: WorkerState,
    },
    AskForMerge,
    AcceptMerge,
    DeclineMerge,
    MergeDifferenceSets {
        sets: Vec<BitSet>,
    },
    SyncDifferenceSets {
        sets: Vec<BitSet>,
        column_count: u32,
    },

    /*── tree search ──*/
    TreeNodeWork {
        x: BitSet,
        y: BitSet,
        next: u32,
        sets: Vec<BitSet>,
        column_count: u32,
        parent: ParentRef,
    },
    TreeNodeFulfilled {
        task_id: u64,
    },
    UccDiscovered {
        ucc: BitSet,
    },

    /*── shutdown ──*/
    ReportAndShutdown {
        summary: SearchSummary,
    },
    PeerFinished {
        discovered: Vec<BitSet>,
        evidence: Vec<BitSet>,
    },
}

impl PeerMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMsg::Registration { .. } => "Registration",
            PeerMsg::FindDifferenceSetFromBatch { .. } => "FindDifferenceSetFromBatch",
            PeerMsg::RequestDataBatch { .. } => "RequestDataBatch",
            PeerMsg::SendDataBatch { .. } => "SendDataBatch",
            PeerMsg::WorkerStateChanged { .. } => "WorkerStateChanged",
            PeerMsg::AskForMerge => "AskForMerge",
            PeerMsg::AcceptMerge => "AcceptMerge",
            PeerMsg::DeclineMerge => "DeclineMerge",
            PeerMsg::MergeDifferenceSets { .. } => "MergeDifferenceSets",
            PeerMsg::SyncDifferenceSets { .. } => "SyncDifferenceSets",
            PeerMsg::TreeNodeWork { .. } => "TreeNodeWork",
            PeerMsg::TreeNodeFulfilled { .. } => "TreeNodeFulfilled",
            PeerMsg::UccDiscovered { .. } => "UccDiscovered",
            PeerMsg::ReportAndShutdown { .. } => "ReportAndShutdown",
            PeerMsg::PeerFinished { .. } => "PeerFinished",
        }
    }
}

/*──────── Inbox ───────*/

/// Everything a node's single-consumer inbox carries: peer messages plus
/// membership notifications.
#[derive(Debug)]
pub enum Command {
    Message { from: PeerId, msg: PeerMsg },
    CurrentClusterState(Vec<Member>),
    MemberUp(Member),
    MemberRemoved(PeerId),
}

/*──────── Handler wiring ───────*/
pub struct PeerProto {
    inbox_tx: mpsc::UnboundedSender<Command>,
}

#[async_trait]
impl Handler for PeerProto {
    async fn on_notify(&self, peer: PeerId, body: &[u8]) -> Result<(), RouterError> {
        let (msg, _) = bincode::decode_from_slice::<PeerMsg, _>(body, bincode::config::standard())
            .map_err(|e| RouterError::Decode(e.to_string()))?;
        self.inbox_tx
            .send(Command::Message { from: peer, msg })
            .map_err(|_| RouterError::Handler("inbox closed".into()))
    }

    fn on_disconnect(&self, peer: PeerId) {
        if self.inbox_tx.send(Command::MemberRemoved(peer)).is_err() {
            debug!(%peer, "peer: departure after inbox closed");
        }
    }
}

pub fn register_peer_protocol(router: &Arc<Router>, inbox_tx: mpsc::UnboundedSender<Command>) {
    router.set_handler(PROTO_PEER, Arc::new(PeerProto { inbox_tx }));
}

/// Self-addressed messages go straight to the own inbox; everything else
/// through the router.
pub async fn send_msg(
    router: &Router,
    me: PeerId,
    inbox_tx: &mpsc::UnboundedSender<Command>,
    to: PeerId,
    msg: &PeerMsg,
) {
    if to == me {
        if inbox_tx
            .send(Command::Message {
                from: me,
                msg: msg.clone(),
            })
            .is_err()
        {
            warn!(peer = %me, kind = msg.kind(), "peer: self-send after inbox closed");
        }
        return;
    }
    if let Err(e) = router.notify_on(PROTO_PEER, to, msg).await {
        warn!(peer = %me, to = %to, kind = msg.kind(), %e, "peer: send failed");
    }
}
