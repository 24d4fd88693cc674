use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    bit_set::BitSet,
    clock::Clock,
    communication::{router::Router, transports::PeerId},
    dictionary::encode_rows,
    difference_sets::{
        DifferenceSetDetector, NullHandling, add_strategy::AddStrategyKind,
        merge::MergeStrategyKind, minimal::MinimizeStrategyKind,
    },
    oracle::{DecisionOracle, OracleStatus},
    peer::{
        protocol::{Command, Member, PeerMsg, Role, SearchSummary, register_peer_protocol, send_msg},
        state::{WorkerState, has_priority},
        tree_search::{Fulfilled, ParentRef, TaskId, TaskRegistry},
    },
    tables::{BatchId, Batches, Row},
};

/*──────────────────────── config ──────────*/

#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Y-branches walked inline before they are handed off as well.
    pub max_local_tree_depth: u32,
    pub progress_log_interval: u64,
    pub cache_flush_threshold: usize,
    pub add_strategy: AddStrategyKind,
    pub minimize_strategy: MinimizeStrategyKind,
    pub merge_strategy: MergeStrategyKind,
    /// Fixed seed for colleague selection; entropy when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_local_tree_depth: 1000,
            progress_log_interval: 100_000_000,
            cache_flush_threshold: 100_000,
            add_strategy: AddStrategyKind::default(),
            minimize_strategy: MinimizeStrategyKind::default(),
            merge_strategy: MergeStrategyKind::default(),
            rng_seed: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/*──────────────────────── worker ───────────────────────*/

/// One peer of the discovery pool.
///
/// All state is owned by the task draining the inbox; nothing here is shared.
pub struct PeerWorker {
    id: PeerId,
    router: Arc<Router>,
    inbox_tx: mpsc::UnboundedSender<Command>,
    inbox_rx: mpsc::UnboundedReceiver<Command>,
    cfg: PeerConfig,
    oracle: Arc<dyn DecisionOracle>,
    clock: Arc<dyn Clock>,
    rng: StdRng,

    state: WorkerState,
    /// Colleague we asked and whose answer is still out.
    merge_target: Option<PeerId>,
    /// Colleague whose ask we accepted; its evidence is owed to us.
    merge_source: Option<PeerId>,
    colleagues: Vec<PeerId>,
    colleague_states: HashMap<PeerId, WorkerState>,
    known_workers: HashSet<PeerId>,
    data_source: Option<PeerId>,
    registered_with_source: bool,

    // difference set discovery
    column_count: usize,
    batch_count: u32,
    null_handling: NullHandling,
    pending_pairs: VecDeque<(BatchId, BatchId)>,
    awaiting_start: bool,
    requested_batch: Option<BatchId>,
    batches: Batches,
    detector: Option<DifferenceSetDetector>,

    // tree search
    tasks: TaskRegistry,
    discovered: BTreeSet<BitSet>,
    tree_search_start: Option<u64>,

    // shutdown
    synced: bool,
    finish_pending: bool,
}

impl PeerWorker {
    /// Build the worker and hook its inbox into `router`.
    pub fn new(
        id: PeerId,
        router: Arc<Router>,
        cfg: PeerConfig,
        oracle: Arc<dyn DecisionOracle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        register_peer_protocol(&router, inbox_tx.clone());
        let rng = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            id,
            router,
            inbox_tx,
            inbox_rx,
            cfg,
            oracle,
            clock,
            rng,
            state: WorkerState::NotStarted,
            merge_target: None,
            merge_source: None,
            colleagues: Vec::new(),
            colleague_states: HashMap::new(),
            known_workers: HashSet::new(),
            data_source: None,
            registered_with_source: false,
            column_count: 0,
            batch_count: 0,
            null_handling: NullHandling::default(),
            pending_pairs: VecDeque::new(),
            awaiting_start: false,
            requested_batch: None,
            batches: Batches::new(),
            detector: None,
            tasks: TaskRegistry::new(),
            discovered: BTreeSet::new(),
            tree_search_start: None,
            synced: false,
            finish_pending: false,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Sender for membership notifications.
    pub fn inbox(&self) -> mpsc::UnboundedSender<Command> {
        self.inbox_tx.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        debug!(peer = %self.id, "worker: start");
        while let Some(cmd) = self.inbox_rx.recv().await {
            if self.handle(cmd).await == Flow::Exit {
                break;
            }
        }
        debug!(peer = %self.id, "worker: exit");
    }

    async fn handle(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::CurrentClusterState(members) => {
                for m in members {
                    self.member_up(m).await;
                }
                self.maybe_register_with_source().await;
            }
            Command::MemberUp(m) => {
                self.member_up(m).await;
                self.maybe_register_with_source().await;
            }
            Command::MemberRemoved(peer) => {
                // Treated as permanent; anything it owed us never arrives.
                warn!(peer = %self.id, gone = %peer, state = %self.state, "worker: member removed");
            }
            Command::Message { from, msg } => return self.on_message(from, msg).await,
        }
        Flow::Continue
    }

    async fn on_message(&mut self, from: PeerId, msg: PeerMsg) -> Flow {
        match msg {
            PeerMsg::Registration { role } => self.on_registration(from, role).await,
            PeerMsg::FindDifferenceSetFromBatch {
                tasks,
                batch_count,
                column_count,
                null_handling,
            } => {
                self.batch_count = batch_count;
                self.on_find_difference_sets(from, tasks, column_count as usize, null_handling)
                    .await
            }
            PeerMsg::SendDataBatch {
                batch_id,
                rows,
                split,
                split_count,
            } => self.on_data_batch(batch_id, rows, split, split_count).await,
            PeerMsg::WorkerStateChanged { state } => {
                return self.on_state_changed(from, state).await;
            }
            PeerMsg::AskForMerge => self.on_ask_for_merge(from).await,
            PeerMsg::AcceptMerge => self.on_accept_merge(from).await,
            PeerMsg::DeclineMerge => self.on_decline_merge(from).await,
            PeerMsg::MergeDifferenceSets { sets } => self.on_merge(from, sets).await,
            PeerMsg::SyncDifferenceSets { sets, column_count } => {
                return self.on_sync(from, sets, column_count as usize).await;
            }
            PeerMsg::TreeNodeWork {
                x,
                y,
                next,
                sets,
                column_count,
                parent,
            } => {
                if self.state != WorkerState::TreeTraversal {
                    self.set_state(WorkerState::TreeTraversal).await;
                }
                self.column_count = column_count as usize;
                let task = self.tasks.create(parent);
                self.search(task, x, y, next, &sets).await;
            }
            PeerMsg::TreeNodeFulfilled { task_id } => {
                if !self.tasks.contains(task_id) {
                    warn!(
                        peer = %self.id,
                        from = %from,
                        task_id,
                        "worker: fulfillment for unknown task"
                    );
                } else if let Some(f) = self.tasks.child_fulfilled(task_id) {
                    self.on_fulfilled(f).await;
                }
            }
            PeerMsg::UccDiscovered { ucc } => {
                self.discovered.insert(ucc);
            }
            PeerMsg::ReportAndShutdown { summary } => {
                return self.on_report_and_shutdown(summary).await;
            }
            other => {
                warn!(
                    peer = %self.id,
                    from = %from,
                    kind = other.kind(),
                    "worker: unexpected message"
                );
            }
        }
        Flow::Continue
    }

    /*──────── sending ────────*/

    async fn send(&self, to: PeerId, msg: PeerMsg) {
        send_msg(&self.router, self.id, &self.inbox_tx, to, &msg).await;
    }

    async fn send_self(&self, msg: PeerMsg) {
        self.send(self.id, msg).await;
    }

    async fn broadcast(&self, msg: PeerMsg) {
        for c in &self.colleagues {
            send_msg(&self.router, self.id, &self.inbox_tx, *c, &msg).await;
        }
    }

    async fn set_state(&mut self, state: WorkerState) {
        debug!(peer = %self.id, from = %self.state, to = %state, "worker: state");
        self.state = state;
        self.broadcast(PeerMsg::WorkerStateChanged { state }).await;
    }

    /*──────── membership ────────*/

    async fn member_up(&mut self, m: Member) {
        if m.id == self.id {
            return;
        }
        match m.role {
            Role::DataSource => self.data_source = Some(m.id),
            Role::Worker => {
                if self.known_workers.insert(m.id) {
                    self.send(m.id, PeerMsg::Registration { role: Role::Worker })
                        .await;
                }
            }
        }
    }

    async fn on_registration(&mut self, from: PeerId, role: Role) {
        if from == self.id || role != Role::Worker || self.colleague_states.contains_key(&from) {
            return;
        }
        self.colleagues.push(from);
        self.colleague_states.insert(from, WorkerState::NotStarted);
        info!(
            peer = %self.id,
            colleague = %from,
            colleagues = self.colleagues.len(),
            "worker: registered colleague"
        );
        self.maybe_register_with_source().await;
    }

    /// Work may only be assigned once every known worker is a colleague.
    async fn maybe_register_with_source(&mut self) {
        if self.registered_with_source {
            return;
        }
        let Some(source) = self.data_source else {
            return;
        };
        if !self
            .known_workers
            .iter()
            .all(|w| self.colleague_states.contains_key(w))
        {
            return;
        }
        self.registered_with_source = true;
        info!(
            peer = %self.id,
            source = %source,
            colleagues = self.colleagues.len(),
            "worker: registering with data source"
        );
        self.send(source, PeerMsg::Registration { role: Role::Worker })
            .await;
    }

    /*──────── difference set discovery ────────*/

    fn detector_mut(&mut self) -> &mut DifferenceSetDetector {
        let (cfg, column_count) = (&self.cfg, self.column_count);
        self.detector
            .get_or_insert_with(|| build_detector(cfg, column_count))
    }

    fn minimal_sets(&mut self) -> Vec<BitSet> {
        self.detector_mut().minimal_difference_sets()
    }

    async fn on_find_difference_sets(
        &mut self,
        from: PeerId,
        tasks: Vec<(BatchId, BatchId)>,
        column_count: usize,
        null_handling: NullHandling,
    ) {
        self.column_count = column_count;
        self.null_handling = null_handling;
        self.pending_pairs = tasks.into();
        self.detector_mut();

        if from == self.id {
            // Continuation for the remaining pairs.
            self.find_difference_sets().await;
            return;
        }

        info!(
            peer = %self.id,
            pairs = self.pending_pairs.len(),
            batches = self.batch_count,
            "worker: batch pairs assigned"
        );
        if self.state != WorkerState::DiscoveringDifferenceSets {
            self.set_state(WorkerState::DiscoveringDifferenceSets).await;
        }
        if self.pending_pairs.is_empty() {
            self.set_state(WorkerState::DoneMerging).await;
            return;
        }
        self.awaiting_start = true;
        self.try_start().await;
    }

    /// Local work begins once no colleague is still `NOT_STARTED` in our view,
    /// so a colleague can never look settled merely for being slow to start.
    async fn try_start(&mut self) {
        if !self.awaiting_start
            || self
                .colleague_states
                .values()
                .any(|s| *s == WorkerState::NotStarted)
        {
            return;
        }
        self.awaiting_start = false;
        self.find_difference_sets().await;
    }

    async fn request_batch(&mut self, batch_id: BatchId) {
        if self.requested_batch.is_some() {
            return;
        }
        let Some(source) = self.data_source else {
            error!(peer = %self.id, batch_id, "worker: no data source to fetch from");
            return;
        };
        self.requested_batch = Some(batch_id);
        debug!(peer = %self.id, batch_id, "worker: requesting batch");
        self.send(source, PeerMsg::RequestDataBatch { batch_id, split: 0 })
            .await;
    }

    async fn on_data_batch(
        &mut self,
        batch_id: BatchId,
        rows: Vec<Row>,
        split: u32,
        split_count: u32,
    ) {
        let missing = self.batches.add_fragment(batch_id, rows, split_count);
        if missing > 0 {
            if let Some(source) = self.data_source {
                self.send(
                    source,
                    PeerMsg::RequestDataBatch {
                        batch_id,
                        split: split + 1,
                    },
                )
                .await;
            }
            return;
        }
        info!(
            peer = %self.id,
            batch_id,
            split_count,
            rows = self.batches.batch(batch_id).map_or(0, |r| r.len()),
            "worker: batch complete"
        );
        if self.requested_batch == Some(batch_id) {
            self.requested_batch = None;
        }
        if self.state == WorkerState::DiscoveringDifferenceSets && !self.awaiting_start {
            self.find_difference_sets().await;
        }
    }

    async fn find_difference_sets(&mut self) {
        let Some(&(a, b)) = self.pending_pairs.front() else {
            self.send_self(PeerMsg::WorkerStateChanged {
                state: WorkerState::ReadyToMerge,
            })
            .await;
            return;
        };
        for id in [a, b] {
            if !self.batches.has_batch(id) {
                self.request_batch(id).await;
                return;
            }
        }

        let rows_a = self.batches.batch(a).unwrap_or_default();
        let rows_b = self.batches.batch(b).unwrap_or_default();
        let (cfg, column_count) = (&self.cfg, self.column_count);
        let detector = self
            .detector
            .get_or_insert_with(|| build_detector(cfg, column_count));
        compare_batches(
            detector,
            rows_a,
            if a == b { None } else { Some(rows_b) },
            self.column_count,
            self.null_handling,
            self.cfg.progress_log_interval,
            self.id,
        );
        let minimal = detector.minimal_difference_sets().len();
        self.pending_pairs.pop_front();
        info!(
            peer = %self.id,
            a,
            b,
            minimal,
            remaining = self.pending_pairs.len(),
            "worker: batch pair done"
        );

        if self.pending_pairs.is_empty() {
            self.send_self(PeerMsg::WorkerStateChanged {
                state: WorkerState::ReadyToMerge,
            })
            .await;
        } else {
            let tasks: Vec<_> = self.pending_pairs.iter().copied().collect();
            self.send_self(PeerMsg::FindDifferenceSetFromBatch {
                tasks,
                batch_count: self.batch_count,
                column_count: self.column_count as u32,
                null_handling: self.null_handling,
            })
            .await;
        }
    }

    /*──────── merge negotiation ────────*/

    async fn on_state_changed(&mut self, from: PeerId, state: WorkerState) -> Flow {
        if from == self.id {
            if self.state != WorkerState::TreeTraversal || state != WorkerState::ReadyToMerge {
                self.state = state;
            }
        } else if let Some(s) = self.colleague_states.get_mut(&from) {
            *s = state;
            self.try_start().await;
        }

        if self.state == WorkerState::ReadyToMerge && state == WorkerState::ReadyToMerge {
            self.try_to_merge().await;
        }
        if self.state == WorkerState::ReadyToMerge {
            self.check_merge_finished().await;
        }
        if self.state == WorkerState::Done && state == WorkerState::Done {
            return self.check_all_done();
        }
        Flow::Continue
    }

    async fn try_to_merge(&mut self) {
        if self.merge_target.is_some() {
            // An earlier ask is still unanswered.
            self.set_state(WorkerState::WaitingForMerge).await;
            return;
        }
        let eligible: Vec<PeerId> = self
            .colleagues
            .iter()
            .copied()
            .filter(|c| {
                self.colleague_states.get(c) == Some(&WorkerState::ReadyToMerge)
                    && !has_priority(c, &self.id)
            })
            .collect();
        if eligible.is_empty() {
            self.set_state(WorkerState::ReadyToMerge).await;
            return;
        }
        let target = eligible[self.rng.gen_range(0..eligible.len())];
        info!(
            peer = %self.id,
            target = %target,
            candidates = eligible.len(),
            "worker: asking for merge"
        );
        self.merge_target = Some(target);
        self.send(target, PeerMsg::AskForMerge).await;
        self.set_state(WorkerState::WaitingForMerge).await;
    }

    async fn negotiate(&mut self) {
        self.try_to_merge().await;
        if self.state == WorkerState::ReadyToMerge {
            self.check_merge_finished().await;
        }
    }

    async fn check_merge_finished(&mut self) {
        if !self.colleague_states.values().all(|s| s.is_settled()) {
            return;
        }
        info!(peer = %self.id, "worker: finished merging");
        let sets = self.minimal_sets();
        self.synced = true;
        let column_count = self.column_count as u32;
        self.broadcast(PeerMsg::SyncDifferenceSets {
            sets: sets.clone(),
            column_count,
        })
        .await;
        self.set_state(WorkerState::TreeTraversal).await;

        info!(peer = %self.id, evidence = sets.len(), "worker: start tree search");
        self.tree_search_start = Some(self.clock.now());
        let root = self.tasks.create_root();
        self.send_self(PeerMsg::TreeNodeWork {
            x: BitSet::new(self.column_count),
            y: BitSet::new(self.column_count),
            next: 0,
            sets,
            column_count,
            parent: ParentRef {
                peer: self.id,
                task_id: root,
            },
        })
        .await;
    }

    async fn on_ask_for_merge(&mut self, from: PeerId) {
        info!(peer = %self.id, from = %from, state = %self.state, "worker: ask for merge");
        if self.state.accepts_merge_request() {
            self.merge_source = Some(from);
            self.send(from, PeerMsg::AcceptMerge).await;
            self.set_state(WorkerState::AcceptedMerge).await;
        } else {
            self.send(from, PeerMsg::DeclineMerge).await;
        }
    }

    async fn on_accept_merge(&mut self, from: PeerId) {
        let answers_our_ask = self.merge_target == Some(from);
        if answers_our_ask {
            self.merge_target = None;
        }
        if !answers_our_ask || self.state != WorkerState::WaitingForMerge {
            info!(
                peer = %self.id,
                from = %from,
                state = %self.state,
                "worker: stale accept, declining"
            );
            self.send(from, PeerMsg::DeclineMerge).await;
            return;
        }
        let sets = self.minimal_sets();
        info!(
            peer = %self.id,
            to = %from,
            sets = sets.len(),
            "worker: merge accepted, sending evidence"
        );
        self.send(from, PeerMsg::MergeDifferenceSets { sets }).await;
        self.set_state(WorkerState::DoneMerging).await;
    }

    /// A decline answers either our own ask or our accept. Only the second
    /// releases an `ACCEPTED_MERGE` peer; the evidence it waits for is owed by
    /// the asker, never by the target of an older ask.
    async fn on_decline_merge(&mut self, from: PeerId) {
        info!(peer = %self.id, from = %from, state = %self.state, "worker: merge declined");
        if self.state == WorkerState::AcceptedMerge && self.merge_source == Some(from) {
            self.merge_source = None;
            self.state = WorkerState::ReadyToMerge;
            self.negotiate().await;
        } else if self.merge_target == Some(from) {
            self.merge_target = None;
            if self.state == WorkerState::WaitingForMerge {
                self.state = WorkerState::ReadyToMerge;
                self.negotiate().await;
            }
        } else {
            debug!(peer = %self.id, from = %from, "worker: decline for nothing pending");
        }
    }

    async fn on_merge(&mut self, from: PeerId, sets: Vec<BitSet>) {
        if self.state != WorkerState::AcceptedMerge || self.merge_source != Some(from) {
            error!(
                peer = %self.id,
                from = %from,
                state = %self.state,
                sets = sets.len(),
                "worker: evidence without an accepted merge, dropped"
            );
            return;
        }
        self.merge_source = None;
        self.set_state(WorkerState::Merging).await;
        let ours = self.detector_mut().last_counted_minimal_count();
        info!(peer = %self.id, from = %from, ours, theirs = sets.len(), "worker: merging");
        let merged = self.detector_mut().absorb_minimal(&sets);
        info!(peer = %self.id, merged, "worker: merged");
        // try_to_merge announces the resulting state.
        self.state = WorkerState::ReadyToMerge;
        self.negotiate().await;
    }

    /// The converged evidence, identical on every peer from here on.
    async fn on_sync(&mut self, from: PeerId, sets: Vec<BitSet>, column_count: usize) -> Flow {
        debug!(peer = %self.id, from = %from, sets = sets.len(), "worker: evidence synced");
        self.column_count = column_count;
        self.detector_mut().replace_minimal(sets);
        self.synced = true;
        if !self.finish_pending {
            return Flow::Continue;
        }
        self.finish_pending = false;
        self.send_finished().await;
        self.check_all_done()
    }

    /*──────── tree search ────────*/

    /// Walk the Y-spine of one node iteratively; X-branches are handed off.
    async fn search(
        &mut self,
        task: TaskId,
        x: BitSet,
        mut y: BitSet,
        mut next: u32,
        sets: &[BitSet],
    ) {
        let column_count = self.column_count;
        let mut depth = 0u32;
        loop {
            depth += 1;
            match self
                .oracle
                .classify(&x, &y, next as usize, sets, column_count)
            {
                OracleStatus::Minimal => {
                    self.report_ucc(x).await;
                    break;
                }
                OracleStatus::Extendable => {
                    let mut x_new = x.copy_with_len(column_count);
                    x_new.set(next as usize);
                    let mut y_new = y.copy_with_len(column_count);
                    y_new.set(next as usize);
                    self.dispatch(task, x_new, y, next + 1, sets).await;
                    if depth >= self.cfg.max_local_tree_depth {
                        self.dispatch(task, x, y_new, next + 1, sets).await;
                        break;
                    }
                    y = y_new;
                    next += 1;
                }
                OracleStatus::NotExtendable => break,
                OracleStatus::Failed => {
                    error!(peer = %self.id, ?x, ?y, next, "worker: oracle failed");
                    break;
                }
            }
        }
        if let Some(f) = self.tasks.finish_local(task) {
            self.on_fulfilled(f).await;
        }
    }

    fn random_colleague(&mut self) -> PeerId {
        if self.colleagues.is_empty() {
            return self.id;
        }
        self.colleagues[self.rng.gen_range(0..self.colleagues.len())]
    }

    async fn dispatch(&mut self, task: TaskId, x: BitSet, y: BitSet, next: u32, sets: &[BitSet]) {
        let to = self.random_colleague();
        self.tasks.add_child(task);
        self.send(
            to,
            PeerMsg::TreeNodeWork {
                x,
                y,
                next,
                sets: sets.to_vec(),
                column_count: self.column_count as u32,
                parent: ParentRef {
                    peer: self.id,
                    task_id: task,
                },
            },
        )
        .await;
    }

    async fn report_ucc(&mut self, ucc: BitSet) {
        debug!(peer = %self.id, ?ucc, "worker: ucc");
        if self.discovered.insert(ucc.clone()) {
            self.broadcast(PeerMsg::UccDiscovered { ucc }).await;
        }
    }

    async fn on_fulfilled(&mut self, f: Fulfilled) {
        match f {
            Fulfilled::Child(parent) => {
                self.send(
                    parent.peer,
                    PeerMsg::TreeNodeFulfilled {
                        task_id: parent.task_id,
                    },
                )
                .await;
            }
            Fulfilled::Root => {
                let start = self.tree_search_start.unwrap_or_else(|| self.clock.now());
                let summary = SearchSummary {
                    ucc_count: self.discovered.len() as u64,
                    tree_search_millis: self.clock.now().saturating_sub(start),
                };
                info!(peer = %self.id, uccs = summary.ucc_count, "worker: finished ucc discovery");
                match self.data_source {
                    Some(source) => self.send(source, PeerMsg::ReportAndShutdown { summary }).await,
                    None => error!(peer = %self.id, "worker: search finished without data source"),
                }
            }
        }
    }

    /*──────── shutdown ────────*/

    async fn on_report_and_shutdown(&mut self, summary: SearchSummary) -> Flow {
        if let Some(start) = self.tree_search_start {
            info!(
                peer = %self.id,
                cost_ms = self.clock.now().saturating_sub(start),
                "worker: tree search cost"
            );
        }
        info!(
            peer = %self.id,
            discovered = self.discovered.len(),
            reported = summary.ucc_count,
            "worker: discovered uccs"
        );
        self.set_state(WorkerState::Done).await;
        if self.synced {
            self.send_finished().await;
        } else {
            // The shutdown overtook the converged evidence; report once it lands.
            debug!(peer = %self.id, "worker: final report waits for evidence sync");
            self.finish_pending = true;
        }
        self.check_all_done()
    }

    async fn send_finished(&mut self) {
        let evidence = self.minimal_sets();
        let Some(source) = self.data_source else {
            error!(peer = %self.id, "worker: no data source to report to");
            return;
        };
        let discovered = self.discovered.iter().cloned().collect();
        self.send(source, PeerMsg::PeerFinished { discovered, evidence })
            .await;
    }

    fn check_all_done(&self) -> Flow {
        if !self.finish_pending
            && self
                .colleague_states
                .values()
                .all(|s| *s == WorkerState::Done)
        {
            info!(peer = %self.id, uccs = self.discovered.len(), "worker: all peers done");
            Flow::Exit
        } else {
            Flow::Continue
        }
    }
}

fn build_detector(cfg: &PeerConfig, column_count: usize) -> DifferenceSetDetector {
    DifferenceSetDetector::from_kinds(
        column_count,
        cfg.add_strategy,
        cfg.minimize_strategy,
        cfg.merge_strategy,
        cfg.cache_flush_threshold,
    )
}

/// Compare every row pair of one batch pair. `rows_b == None` means the pair
/// is a single batch compared with itself (only `i < j`).
fn compare_batches(
    detector: &mut DifferenceSetDetector,
    rows_a: &[Row],
    rows_b: Option<&[Row]>,
    column_count: usize,
    nulls: NullHandling,
    log_every: u64,
    peer: PeerId,
) {
    let encoded = match rows_b {
        None => encode_rows(rows_a, column_count),
        Some(rows_b) => encode_rows(rows_a.iter().chain(rows_b), column_count),
    };
    let (left, right) = encoded.split_at(rows_a.len());
    let total: u64 = match rows_b {
        None => (left.len() as u64 * left.len().saturating_sub(1) as u64) / 2,
        Some(_) => left.len() as u64 * right.len() as u64,
    };
    detector.reserve(usize::try_from(total).unwrap_or(usize::MAX));

    let log_every = log_every.max(1);
    let mut count = 0u64;
    let mut add = |detector: &mut DifferenceSetDetector, a: &[u32], b: &[u32]| {
        detector.add_difference_set(a, b, nulls);
        count += 1;
        if count % log_every == 0 {
            info!(
                %peer,
                added = count,
                total,
                cached = detector.cached_count(),
                minimal = detector.last_counted_minimal_count(),
                "worker: difference set progress"
            );
        }
    };
    match rows_b {
        None => {
            for (i, a) in left.iter().enumerate() {
                for b in &left[i + 1..] {
                    add(detector, a, b);
                }
            }
        }
        Some(_) => {
            for a in left {
                for b in right {
                    add(detector, a, b);
                }
            }
        }
    }
}
