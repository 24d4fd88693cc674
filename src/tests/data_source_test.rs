use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::{
    communication::{
        router::{DenyReason, Router, RouterConfig, RouterError},
        transports::{Connector, PeerId, inmem::InMemNetwork},
    },
    data_source::{DataSource, DataSourceConfig, ReportReceiver},
    discovery_error::DiscoveryError,
    peer::protocol::{Command, PROTO_PEER, PeerMsg, Role, register_peer_protocol},
    tables::{Row, Table},
};

fn pid(x: u8) -> PeerId {
    PeerId::from_bytes([x; 16])
}

/// A data source expecting one worker, and a scripted worker wired to it.
struct SourceRig {
    source: PeerId,
    worker_router: Arc<Router>,
    worker_rx: mpsc::UnboundedReceiver<Command>,
    report_rx: ReportReceiver,
}

impl SourceRig {
    async fn new(source_cfg: RouterConfig, table: &Table, batch_count: usize) -> Self {
        let source = pid(1);
        let worker = pid(2);
        let net = InMemNetwork::new();
        let conn_s = net.connector(source).dial(&worker).await.unwrap();
        let conn_w = net.connector(worker).dial(&source).await.unwrap();

        let source_router = Router::new(source_cfg);
        let (ds, report_rx) = DataSource::new(
            source,
            source_router.clone(),
            DataSourceConfig {
                batch_count,
                rows_per_split: 2,
                ..DataSourceConfig::default()
            },
            table,
            1,
        );
        let worker_router = Router::new(RouterConfig::default());
        let (tx, worker_rx) = mpsc::unbounded_channel();
        register_peer_protocol(&worker_router, tx);
        source_router.connect_peer(worker, conn_s);
        worker_router.connect_peer(source, conn_w);
        ds.spawn();

        Self {
            source,
            worker_router,
            worker_rx,
            report_rx,
        }
    }

    async fn send(&self, msg: PeerMsg) {
        self.worker_router
            .notify_on(PROTO_PEER, self.source, &msg)
            .await
            .unwrap();
    }

    async fn next_msg(&mut self) -> PeerMsg {
        loop {
            let cmd = tokio::time::timeout(Duration::from_secs(5), self.worker_rx.recv())
                .await
                .expect("timed out waiting for the data source")
                .expect("worker inbox closed");
            if let Command::Message { msg, .. } = cmd {
                return msg;
            }
        }
    }

    async fn report(self) -> Result<crate::data_source::DiscoveryReport, DiscoveryError> {
        tokio::time::timeout(Duration::from_secs(5), self.report_rx)
            .await
            .expect("no report")
            .expect("report sender dropped")
    }
}

fn numbered(rows: usize) -> Table {
    Table::new(
        1,
        (0..rows).map(|i| Row::from_strs(&[&i.to_string()])).collect(),
    )
}

#[tokio::test]
async fn lone_worker_gets_every_pair_and_split() {
    let mut rig = SourceRig::new(RouterConfig::default(), &numbered(6), 2).await;
    rig.send(PeerMsg::Registration { role: Role::Worker }).await;

    let assignment = rig.next_msg().await;
    let PeerMsg::FindDifferenceSetFromBatch {
        tasks, batch_count, ..
    } = assignment
    else {
        panic!("expected an assignment, got {assignment:?}");
    };
    assert_eq!(tasks, vec![(0, 0), (0, 1), (1, 1)]);
    assert_eq!(batch_count, 2);

    // Three rows per batch, two per split.
    rig.send(PeerMsg::RequestDataBatch { batch_id: 1, split: 1 })
        .await;
    let batch = rig.next_msg().await;
    assert!(matches!(
        batch,
        PeerMsg::SendDataBatch { batch_id: 1, split: 1, split_count: 2, ref rows }
            if *rows == vec![Row::from_strs(&["5"])]
    ));
}

#[tokio::test]
async fn worker_leaving_before_its_report_fails_the_run() {
    let mut rig = SourceRig::new(RouterConfig::default(), &numbered(4), 2).await;
    rig.send(PeerMsg::Registration { role: Role::Worker }).await;
    assert!(matches!(
        rig.next_msg().await,
        PeerMsg::FindDifferenceSetFromBatch { .. }
    ));

    let source = rig.source;
    rig.worker_router.disconnect_peer(source).await;

    let err = rig.report().await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Shutdown(_)), "{err}");
}

#[tokio::test]
async fn undeliverable_assignment_fails_the_run() {
    // Registrations fit the frame limit; eight batches worth of pairs do not.
    let cfg = RouterConfig {
        max_frame_bytes: 48,
        ..RouterConfig::default()
    };
    let rig = SourceRig::new(cfg, &numbered(8), 8).await;
    rig.send(PeerMsg::Registration { role: Role::Worker }).await;

    let err = rig.report().await.unwrap_err();
    assert!(
        matches!(
            err,
            DiscoveryError::Router(RouterError::Denied {
                reason: DenyReason::FrameTooLarge
            })
        ),
        "{err}"
    );
}
