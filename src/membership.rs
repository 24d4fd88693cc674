use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    communication::{
        router::{Router, RouterConfig},
        transports::{Connector, PeerId, inmem::InMemNetwork},
    },
    data_source::{DataSource, DataSourceConfig, DiscoveryReport, ReportReceiver},
    discovery_error::DiscoveryError,
    oracle::{DecisionOracle, HittingSetOracle},
    peer::{
        protocol::{Command, Member, Role},
        worker::{PeerConfig, PeerWorker},
    },
    tables::Table,
};

#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub workers: usize,
    pub peer: PeerConfig,
    pub data: DataSourceConfig,
    pub router: RouterConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            peer: PeerConfig::default(),
            data: DataSourceConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

/// A full mesh of workers plus one data source, all in this process over an
/// [`InMemNetwork`].
pub struct LocalCluster {
    workers: Vec<PeerId>,
    data_source: PeerId,
    routers: HashMap<PeerId, Arc<Router>>,
    handles: Vec<JoinHandle<()>>,
    report_rx: ReportReceiver,
}

impl LocalCluster {
    pub async fn launch(table: &Table, cfg: ClusterConfig) -> Result<Self, DiscoveryError> {
        Self::launch_with(table, cfg, Arc::new(HittingSetOracle), Arc::new(SystemClock)).await
    }

    pub async fn launch_with(
        table: &Table,
        cfg: ClusterConfig,
        oracle: Arc<dyn DecisionOracle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DiscoveryError> {
        if cfg.workers == 0 {
            return Err(DiscoveryError::Config("at least one worker is required".into()));
        }

        let net = InMemNetwork::with_capacity(cfg.router.per_peer_send_q.max(1));
        let source_id = PeerId::new();
        let worker_ids: Vec<PeerId> = (0..cfg.workers).map(|_| PeerId::new()).collect();

        let mut routers = HashMap::new();
        for id in worker_ids.iter().chain(std::iter::once(&source_id)) {
            routers.insert(*id, Router::new(cfg.router.clone()));
        }
        let router = |id: &PeerId| -> Result<Arc<Router>, DiscoveryError> {
            routers
                .get(id)
                .cloned()
                .ok_or_else(|| DiscoveryError::Config(format!("no router for {id}")))
        };

        // Handlers go in before any connection delivers frames.
        let (source, report_rx) = DataSource::new(
            source_id,
            router(&source_id)?,
            cfg.data.clone(),
            table,
            cfg.workers,
        );
        let mut workers = Vec::with_capacity(cfg.workers);
        for (i, id) in worker_ids.iter().enumerate() {
            let mut peer_cfg = cfg.peer.clone();
            peer_cfg.rng_seed = cfg.peer.rng_seed.map(|s| s.wrapping_add(i as u64));
            workers.push(PeerWorker::new(
                *id,
                router(id)?,
                peer_cfg,
                Arc::clone(&oracle),
                Arc::clone(&clock),
            ));
        }

        let all: Vec<PeerId> = routers.keys().copied().collect();
        for a in &all {
            let connector = net.connector(*a);
            for b in &all {
                if a == b {
                    continue;
                }
                let conn = connector.dial(b).await?;
                router(a)?.connect_peer(*b, conn);
            }
        }

        let members: Vec<Member> = worker_ids
            .iter()
            .map(|id| Member {
                id: *id,
                role: Role::Worker,
            })
            .chain(std::iter::once(Member {
                id: source_id,
                role: Role::DataSource,
            }))
            .collect();

        let mut handles = Vec::with_capacity(workers.len() + 1);
        handles.push(source.spawn());
        for w in workers {
            w.inbox()
                .send(Command::CurrentClusterState(members.clone()))
                .map_err(|_| DiscoveryError::Shutdown(format!("worker {} inbox closed", w.id())))?;
            handles.push(w.spawn());
        }
        info!(workers = worker_ids.len(), source = %source_id, "cluster: launched");

        Ok(Self {
            workers: worker_ids,
            data_source: source_id,
            routers,
            handles,
            report_rx,
        })
    }

    pub fn workers(&self) -> &[PeerId] {
        &self.workers
    }

    pub fn data_source(&self) -> PeerId {
        self.data_source
    }

    pub fn router(&self, peer: &PeerId) -> Option<Arc<Router>> {
        self.routers.get(peer).cloned()
    }

    /// Wait for the data source's report, then for every node to stop.
    pub async fn report(self) -> Result<DiscoveryReport, DiscoveryError> {
        let report = self
            .report_rx
            .await
            .map_err(|_| DiscoveryError::Shutdown("data source stopped without a report".into()))??;
        for h in self.handles {
            h.await
                .map_err(|e| DiscoveryError::Shutdown(format!("node task failed: {e}")))?;
        }
        Ok(report)
    }
}

/// Discover every UCC of `table` on a fresh local cluster.
pub async fn discover(
    table: &Table,
    cfg: ClusterConfig,
) -> Result<DiscoveryReport, DiscoveryError> {
    LocalCluster::launch(table, cfg).await?.report().await
}
