use async_trait::async_trait;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use bincode::{Decode, Encode};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::communication::transports::{PeerId, TransportConn};

/*──────────────────────── framing ───────────────────────*/

pub type MsgId = u64;

/// One fire-and-forget frame. Peers talk exclusively in notifies; replies are
/// just notifies travelling the other way.
#[derive(Clone, Debug, Encode, Decode)]
pub struct Envelope {
    pub id: MsgId,

    /// Protocol namespace. Each handler owns one proto id.
    pub proto: u16,

    /// Wire version. `major` must match exactly; `minor` must be >= our `minor`.
    pub major: u16,
    pub minor: u16,

    pub payload: Vec<u8>,
}

/*──────────────────────── errors ─────────*/

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum DenyReason {
    FrameTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum RouterError {
    NoConnection,
    Encode(String),
    Decode(String),
    Denied { reason: DenyReason },
    /// Handler returned Err(String)
    Handler(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RouterError::*;
        match self {
            NoConnection => write!(f, "no connection"),
            Encode(e) => write!(f, "encode: {e}"),
            Decode(e) => write!(f, "decode: {e}"),
            Denied { reason } => write!(f, "denied: {:?}", reason),
            Handler(msg) => write!(f, "handler error: {msg}"),
        }
    }
}

impl std::error::Error for RouterError {}

/*──────────────────────── config ──────────*/

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub version_major: u16,
    pub version_minor: u16,
    /// Whole evidence sets travel in single frames, so this is generous.
    pub max_frame_bytes: usize,
    pub per_peer_send_q: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            version_major: 1,
            version_minor: 0,
            max_frame_bytes: 64 * 1024 * 1024,
            per_peer_send_q: 1024,
        }
    }
}

/*──────────────────────── handler API ──────────────────*/

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle a notify (no response). Errors are logged by the read loop and
    /// never close the connection.
    async fn on_notify(&self, peer: PeerId, body: &[u8]) -> Result<(), RouterError>;

    /// The connection to `peer` is gone for good.
    fn on_disconnect(&self, _peer: PeerId) {}
}

/*──────────────────────── Router ───────────────────────*/

/// Point-to-point message plumbing for one peer: a per-remote send worker and
/// read loop over a [`TransportConn`], with decoded payloads dispatched to the
/// handler registered for the envelope's protocol id.
pub struct Router {
    cfg: RouterConfig,
    next_id: AtomicU64,

    // connections & per-peer send workers
    conns: Mutex<HashMap<PeerId, Arc<dyn TransportConn>>>,
    workers: Mutex<HashMap<PeerId, mpsc::Sender<Vec<u8>>>>,

    // protocol handlers (keyed by `proto`)
    handlers: RwLock<HashMap<u16, Arc<dyn Handler>>>,
}

impl Router {
    pub fn new(cfg: RouterConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            next_id: AtomicU64::new(1),
            conns: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        })
    }

    #[inline]
    fn alloc_id(&self) -> MsgId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a handler for a protocol id. Fail if already taken
    pub fn set_handler(&self, proto: u16, h: Arc<dyn Handler>) {
        let mut g = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        assert!(
            !g.contains_key(&proto),
            "protocol id {proto} already registered"
        );
        g.insert(proto, h);
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .conns
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .copied()
            .collect();
        peers.sort();
        peers
    }

    /// Attach a peer connection and spawn its read & send tasks.
    pub fn connect_peer(self: &Arc<Self>, peer: PeerId, conn: Arc<dyn TransportConn>) {
        info!(%peer, "router: connect_peer");

        // set up send worker (pre-encoded bytes)
        let (tx_bytes, mut rx_bytes) = mpsc::channel::<Vec<u8>>(self.cfg.per_peer_send_q);
        self.workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(peer, tx_bytes);
        self.conns
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(peer, conn.clone());

        // Send worker: owns this conn for outbound frames.
        let this = Arc::clone(self);
        let conn_for_send = conn.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx_bytes.recv().await {
                if let Err(e) = conn_for_send.send_bytes(bytes).await {
                    warn!(%peer, %e, "router: send failed, dropping peer");
                    this.drop_peer(peer);
                    break;
                }
            }
            debug!(%peer, "router: send worker exit");
        });

        // Read loop: the receiver moves into the task.
        let mut rx_frames = conn.recv();
        let this2 = Arc::clone(self);
        tokio::spawn(async move {
            this2.read_loop(peer, &mut rx_frames).await;
        });
    }

    /// Close the connection to `peer` from our side.
    pub async fn disconnect_peer(&self, peer: PeerId) {
        let conn = self
            .conns
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&peer)
            .cloned();
        if let Some(conn) = conn {
            conn.close().await;
        }
        self.drop_peer(peer);
    }

    fn drop_peer(&self, peer: PeerId) {
        self.workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&peer);
        let was_connected = self
            .conns
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&peer)
            .is_some();
        if !was_connected {
            return;
        }
        debug!(%peer, "router: drop_peer");

        let handlers: Vec<Arc<dyn Handler>> = self
            .handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        for h in handlers {
            h.on_disconnect(peer);
        }
    }

    #[inline]
    fn inbound_version_ok(&self, major: u16, minor: u16) -> bool {
        major == self.cfg.version_major && minor >= self.cfg.version_minor
    }

    #[instrument(skip_all, fields(%peer))]
    async fn read_loop(&self, peer: PeerId, rx: &mut mpsc::Receiver<Vec<u8>>) {
        debug!(%peer, "router: read loop start");
        while let Some(bytes) = rx.recv().await {
            if bytes.len() > self.cfg.max_frame_bytes {
                warn!(%peer, len = bytes.len(), "router: inbound oversize");
                continue;
            }
            let env: Envelope =
                match bincode::decode_from_slice(&bytes, bincode::config::standard())
                    .map(|(v, _)| v)
                {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(%peer, ?e, "router: bad decode");
                        continue;
                    }
                };

            if !self.inbound_version_ok(env.major, env.minor) {
                warn!(%peer, major = env.major, minor = env.minor, "router: version mismatch");
                continue;
            }

            let handler = {
                let g = self.handlers.read().unwrap_or_else(|p| p.into_inner());
                g.get(&env.proto).cloned()
            };
            match handler {
                Some(h) => {
                    if let Err(e) = h.on_notify(peer, &env.payload).await {
                        warn!(%peer, proto = env.proto, %e, "router: handler error");
                    }
                }
                None => warn!(%peer, proto = env.proto, "router: no handler"),
            }
        }
        debug!(%peer, "router: read loop exit");
        self.drop_peer(peer);
    }

    /// Pre-encode and send; enforce max-frame.
    async fn enqueue(&self, peer: PeerId, env: Envelope) -> Result<(), RouterError> {
        let bytes = bincode::encode_to_vec(&env, bincode::config::standard())
            .map_err(|e| RouterError::Encode(e.to_string()))?;

        if bytes.len() > self.cfg.max_frame_bytes {
            warn!(%peer, len = bytes.len(), "router: outbound oversize");
            return Err(RouterError::Denied {
                reason: DenyReason::FrameTooLarge,
            });
        }

        let tx = {
            let g = self.workers.lock().unwrap_or_else(|p| p.into_inner());
            g.get(&peer).cloned()
        }
        .ok_or(RouterError::NoConnection)?;

        match tx.send(bytes).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.drop_peer(peer);
                Err(RouterError::NoConnection)
            }
        }
    }

    /*──────── public API ────────*/

    /// Fire-and-forget notify on a specific protocol.
    pub async fn notify_on<M: Encode>(
        &self,
        proto: u16,
        peer: PeerId,
        msg: &M,
    ) -> Result<(), RouterError> {
        let payload = bincode::encode_to_vec(msg, bincode::config::standard())
            .map_err(|e| RouterError::Encode(e.to_string()))?;
        let env = Envelope {
            id: self.alloc_id(),
            proto,
            major: self.cfg.version_major,
            minor: self.cfg.version_minor,
            payload,
        };
        self.enqueue(peer, env).await
    }
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Tests (uses in-memory transport)                                             */
/*──────────────────────────────────────────────────────────────────────────────*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::transports::{
        Connector,
        inmem::InMemNetwork,
    };
    use tokio::sync::mpsc;

    fn pid(x: u8) -> PeerId {
        let mut b = [0u8; 16];
        b[0] = x;
        PeerId::from_bytes(b)
    }

    const PROTO_TEST: u16 = 1;

    #[derive(Debug, Encode, Decode, PartialEq)]
    enum Msg {
        Notify(String),
        Blob(Vec<u8>),
    }

    struct TestHandler {
        notify_tx: mpsc::UnboundedSender<String>,
        gone_tx: mpsc::UnboundedSender<PeerId>,
    }

    #[async_trait::async_trait]
    impl Handler for TestHandler {
        async fn on_notify(&self, _peer: PeerId, body: &[u8]) -> Result<(), RouterError> {
            let (m, _) = bincode::decode_from_slice::<Msg, _>(body, bincode::config::standard())
                .map_err(|e| RouterError::Decode(e.to_string()))?;
            if let Msg::Notify(s) = m {
                let _ = self.notify_tx.send(s);
            }
            Ok(())
        }

        fn on_disconnect(&self, peer: PeerId) {
            let _ = self.gone_tx.send(peer);
        }
    }

    struct Pair {
        a: Arc<Router>,
        b: Arc<Router>,
        notes: mpsc::UnboundedReceiver<String>,
        gone: mpsc::UnboundedReceiver<PeerId>,
    }

    async fn pair(cfg_a: RouterConfig) -> Pair {
        let net = InMemNetwork::new();
        let conn_a_to_b = net.connector(pid(1)).dial(&pid(2)).await.unwrap();
        let conn_b_to_a = net.connector(pid(2)).dial(&pid(1)).await.unwrap();

        let a = Router::new(cfg_a);
        let b = Router::new(RouterConfig::default());
        let (notify_tx, notes) = mpsc::unbounded_channel();
        let (gone_tx, gone) = mpsc::unbounded_channel();
        b.set_handler(PROTO_TEST, Arc::new(TestHandler { notify_tx, gone_tx }));

        a.connect_peer(pid(2), conn_a_to_b);
        b.connect_peer(pid(1), conn_b_to_a);
        Pair { a, b, notes, gone }
    }

    #[tokio::test]
    async fn notify_is_delivered_in_order() {
        let mut p = pair(RouterConfig::default()).await;
        for s in ["one", "two", "three"] {
            p.a.notify_on(PROTO_TEST, pid(2), &Msg::Notify(s.into()))
                .await
                .unwrap();
        }
        for s in ["one", "two", "three"] {
            assert_eq!(p.notes.recv().await.unwrap(), s);
        }
    }

    #[tokio::test]
    async fn unknown_peer_is_no_connection() {
        let p = pair(RouterConfig::default()).await;
        let err = p
            .a
            .notify_on(PROTO_TEST, pid(9), &Msg::Notify("x".into()))
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::NoConnection);
    }

    #[tokio::test]
    async fn oversize_frame_is_refused_locally() {
        let mut cfg = RouterConfig::default();
        cfg.max_frame_bytes = 128;
        let p = pair(cfg).await;
        let err = p
            .a
            .notify_on(PROTO_TEST, pid(2), &Msg::Blob(vec![7u8; 1024]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RouterError::Denied {
                reason: DenyReason::FrameTooLarge
            }
        );
    }

    #[tokio::test]
    async fn unhandled_proto_is_dropped_and_stream_continues() {
        let mut p = pair(RouterConfig::default()).await;
        p.a.notify_on(99, pid(2), &Msg::Notify("lost".into()))
            .await
            .unwrap();
        p.a.notify_on(PROTO_TEST, pid(2), &Msg::Notify("kept".into()))
            .await
            .unwrap();
        assert_eq!(p.notes.recv().await.unwrap(), "kept");
    }

    #[tokio::test]
    async fn remote_close_reports_disconnect_once() {
        let mut p = pair(RouterConfig::default()).await;
        p.a.disconnect_peer(pid(2)).await;
        assert_eq!(p.gone.recv().await.unwrap(), pid(1));
        assert!(p.b.connected_peers().is_empty());
        assert!(p.gone.try_recv().is_err());
    }
}
