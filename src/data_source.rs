use std::{collections::BTreeSet, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    bit_set::BitSet,
    communication::{router::Router, transports::PeerId},
    difference_sets::NullHandling,
    discovery_error::DiscoveryError,
    peer::protocol::{
        Command, PROTO_PEER, PeerMsg, Role, SearchSummary, register_peer_protocol, send_msg,
    },
    tables::{BatchId, Row, Table},
};

#[derive(Clone, Debug)]
pub struct DataSourceConfig {
    pub batch_count: usize,
    /// Upper bound on rows per `SendDataBatch` fragment.
    pub rows_per_split: usize,
    pub null_handling: NullHandling,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            batch_count: 4,
            rows_per_split: 1000,
            null_handling: NullHandling::default(),
        }
    }
}

/// What one worker held when it shut down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerOutcome {
    pub peer: PeerId,
    pub discovered: Vec<BitSet>,
    pub evidence: Vec<BitSet>,
}

#[derive(Clone, Debug)]
pub struct DiscoveryReport {
    /// Union of every peer's discoveries, sorted.
    pub uccs: Vec<BitSet>,
    /// As sent by the root owner.
    pub summary: SearchSummary,
    /// Number of search-complete notifications received.
    pub root_reports: u32,
    pub peers: Vec<PeerOutcome>,
}

pub type ReportReceiver = oneshot::Receiver<Result<DiscoveryReport, DiscoveryError>>;

/// Holds the table, hands out batch pairs and batches, and collects the final
/// reports. It takes no part in merging or searching.
pub struct DataSource {
    id: PeerId,
    router: Arc<Router>,
    inbox_tx: mpsc::UnboundedSender<Command>,
    inbox_rx: mpsc::UnboundedReceiver<Command>,
    cfg: DataSourceConfig,
    column_count: usize,
    batches: Vec<Vec<Row>>,
    expected_workers: usize,

    workers: Vec<PeerId>,
    assigned: bool,
    root_reports: u32,
    summary: Option<SearchSummary>,
    finished: Vec<PeerOutcome>,
    report_tx: Option<oneshot::Sender<Result<DiscoveryReport, DiscoveryError>>>,
}

impl DataSource {
    pub fn new(
        id: PeerId,
        router: Arc<Router>,
        cfg: DataSourceConfig,
        table: &Table,
        expected_workers: usize,
    ) -> (Self, ReportReceiver) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        register_peer_protocol(&router, inbox_tx.clone());
        let (report_tx, report_rx) = oneshot::channel();
        let batches = table.batches(cfg.batch_count);
        info!(
            peer = %id,
            rows = table.rows.len(),
            columns = table.column_count,
            batches = batches.len(),
            "data source: table loaded"
        );
        (
            Self {
                id,
                router,
                inbox_tx,
                inbox_rx,
                cfg,
                column_count: table.column_count,
                batches,
                expected_workers,
                workers: Vec::new(),
                assigned: false,
                root_reports: 0,
                summary: None,
                finished: Vec::new(),
                report_tx: Some(report_tx),
            },
            report_rx,
        )
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.inbox_rx.recv().await {
            let done = match cmd {
                Command::Message { from, msg } => self.on_message(from, msg).await,
                Command::MemberRemoved(peer) => self.on_member_removed(peer),
                Command::CurrentClusterState(_) | Command::MemberUp(_) => false,
            };
            if done {
                break;
            }
        }
        debug!(peer = %self.id, "data source: exit");
    }

    async fn send(&self, to: PeerId, msg: PeerMsg) {
        send_msg(&self.router, self.id, &self.inbox_tx, to, &msg).await;
    }

    async fn on_message(&mut self, from: PeerId, msg: PeerMsg) -> bool {
        match msg {
            PeerMsg::Registration { role: Role::Worker } => self.on_registration(from).await,
            PeerMsg::RequestDataBatch { batch_id, split } => {
                self.on_request_batch(from, batch_id, split).await
            }
            PeerMsg::ReportAndShutdown { summary } => self.on_search_complete(from, summary).await,
            PeerMsg::PeerFinished {
                discovered,
                evidence,
            } => return self.on_peer_finished(from, discovered, evidence),
            PeerMsg::WorkerStateChanged { .. } => {}
            other => {
                warn!(
                    peer = %self.id,
                    from = %from,
                    kind = other.kind(),
                    "data source: unexpected message"
                );
            }
        }
        false
    }

    async fn on_registration(&mut self, from: PeerId) {
        if self.workers.contains(&from) {
            return;
        }
        self.workers.push(from);
        info!(
            peer = %self.id,
            worker = %from,
            registered = self.workers.len(),
            expected = self.expected_workers,
            "data source: worker registered"
        );
        if !self.assigned && self.workers.len() >= self.expected_workers {
            self.assign().await;
        }
    }

    /// Every pair `(i, j)` with `i <= j`, round robin over the workers. A
    /// worker that cannot be handed its pairs leaves the run without a
    /// result, so a failed send fails the report.
    async fn assign(&mut self) {
        self.assigned = true;
        let n = self.batches.len() as BatchId;
        let mut per_worker: Vec<Vec<(BatchId, BatchId)>> = vec![Vec::new(); self.workers.len()];
        let mut k = 0usize;
        for i in 0..n {
            for j in i..n {
                per_worker[k % self.workers.len()].push((i, j));
                k += 1;
            }
        }
        info!(
            peer = %self.id,
            pairs = k,
            workers = self.workers.len(),
            "data source: distributing batch pairs"
        );
        let assignments: Vec<_> = self.workers.iter().copied().zip(per_worker).collect();
        for (worker, tasks) in assignments {
            let msg = PeerMsg::FindDifferenceSetFromBatch {
                tasks,
                batch_count: n,
                column_count: self.column_count as u32,
                null_handling: self.cfg.null_handling,
            };
            if let Err(e) = self.router.notify_on(PROTO_PEER, worker, &msg).await {
                error!(peer = %self.id, worker = %worker, %e, "data source: assignment failed");
                self.resolve(Err(e.into()));
                return;
            }
        }
    }

    async fn on_request_batch(&self, from: PeerId, batch_id: BatchId, split: u32) {
        let Some(rows) = self.batches.get(batch_id as usize) else {
            warn!(peer = %self.id, from = %from, batch_id, "data source: unknown batch");
            return;
        };
        let per_split = self.cfg.rows_per_split.max(1);
        let split_count = rows.len().div_ceil(per_split).max(1) as u32;
        if split >= split_count {
            warn!(
                peer = %self.id,
                from = %from,
                batch_id,
                split,
                split_count,
                "data source: split out of range"
            );
            return;
        }
        let start = split as usize * per_split;
        let end = (start + per_split).min(rows.len());
        debug!(
            peer = %self.id,
            to = %from,
            batch_id,
            split,
            split_count,
            "data source: sending split"
        );
        self.send(
            from,
            PeerMsg::SendDataBatch {
                batch_id,
                rows: rows[start..end].to_vec(),
                split,
                split_count,
            },
        )
        .await;
    }

    async fn on_search_complete(&mut self, from: PeerId, summary: SearchSummary) {
        self.root_reports += 1;
        if self.root_reports > 1 {
            error!(
                peer = %self.id,
                from = %from,
                reports = self.root_reports,
                "data source: duplicate search completion"
            );
            return;
        }
        info!(
            peer = %self.id,
            root = %from,
            uccs = summary.ucc_count,
            tree_search_ms = summary.tree_search_millis,
            "data source: search complete, shutting down workers"
        );
        self.summary = Some(summary);
        for w in &self.workers {
            send_msg(
                &self.router,
                self.id,
                &self.inbox_tx,
                *w,
                &PeerMsg::ReportAndShutdown { summary },
            )
            .await;
        }
    }

    fn on_peer_finished(
        &mut self,
        from: PeerId,
        discovered: Vec<BitSet>,
        evidence: Vec<BitSet>,
    ) -> bool {
        if self.finished.iter().any(|o| o.peer == from) {
            return false;
        }
        self.finished.push(PeerOutcome {
            peer: from,
            discovered,
            evidence,
        });
        if self.finished.len() < self.workers.len() {
            return false;
        }

        let uccs: BTreeSet<BitSet> = self
            .finished
            .iter()
            .flat_map(|o| o.discovered.iter().cloned())
            .collect();
        let mut peers = std::mem::take(&mut self.finished);
        peers.sort_by_key(|o| o.peer);
        let report = DiscoveryReport {
            uccs: uccs.into_iter().collect(),
            summary: self.summary.unwrap_or_default(),
            root_reports: self.root_reports,
            peers,
        };
        info!(peer = %self.id, uccs = report.uccs.len(), "data source: all workers finished");
        self.resolve(Ok(report));
        true
    }

    fn on_member_removed(&mut self, peer: PeerId) -> bool {
        warn!(peer = %self.id, gone = %peer, "data source: member removed");
        let owed = self.workers.contains(&peer) && !self.finished.iter().any(|o| o.peer == peer);
        if owed {
            self.resolve(Err(DiscoveryError::Shutdown(format!(
                "worker {peer} left before finishing"
            ))));
        }
        false
    }

    fn resolve(&mut self, result: Result<DiscoveryReport, DiscoveryError>) {
        if let Some(tx) = self.report_tx.take() {
            if tx.send(result).is_err() {
                debug!(peer = %self.id, "data source: report receiver gone");
            }
        }
    }
}
