pub mod inmem;

use crate::uuid_bytes::UuidBytes;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type PeerId = UuidBytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    ConnectionClosed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

/*──────── peer addressing ──────────────*/
pub trait PeerAddr: Send + Sync + Clone + Debug {}
impl<T: Send + Sync + Clone + Debug> PeerAddr for T {}

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    type Addr: PeerAddr;
    async fn dial(&self, addr: &Self::Addr) -> Result<Arc<dyn TransportConn>, TransportError>;
}

/*──────── per-peer connection ──────────*/
/// Ordered byte pipe to one remote peer.
#[async_trait::async_trait]
pub trait TransportConn: Send + Sync {
    async fn send_bytes(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
    /// Inbound frames from the remote peer. Handed out once.
    fn recv(&self) -> mpsc::Receiver<Vec<u8>>;
    async fn close(&self);
}
