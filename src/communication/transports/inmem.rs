use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;

use crate::communication::transports::{Connector, PeerId, TransportConn, TransportError};

/*──────────────────────────────────────────────────────────────────────────────*/
/* Network                                                                      */
/*──────────────────────────────────────────────────────────────────────────────*/

type ChanTx = mpsc::Sender<Vec<u8>>;
type ChanRx = mpsc::Receiver<Vec<u8>>;

// Keys are (src, dst)
type Key = (PeerId, PeerId);

/// Process-local "wire" between peers. Every directed pair gets one bounded
/// FIFO channel; each end is handed out to exactly one dialer.
pub struct InMemNetwork {
    capacity: usize,
    senders: Mutex<HashMap<Key, ChanTx>>,
    // Stored under (dst, src) so *dst* can later take "from src".
    receivers: Mutex<HashMap<Key, ChanRx>>,
}

impl InMemNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            senders: Mutex::new(HashMap::new()),
            receivers: Mutex::new(HashMap::new()),
        })
    }

    pub fn connector(self: &Arc<Self>, local: PeerId) -> InMemConnector {
        InMemConnector {
            network: Arc::clone(self),
            local,
        }
    }

    fn ensure_path(&self, src: PeerId, dst: PeerId) {
        let mut s_map = self.senders.lock().unwrap_or_else(|p| p.into_inner());
        let mut r_map = self.receivers.lock().unwrap_or_else(|p| p.into_inner());
        if s_map.contains_key(&(src, dst)) || r_map.contains_key(&(dst, src)) {
            return;
        }
        let (tx, rx) = mpsc::channel::<Vec<u8>>(self.capacity);
        s_map.insert((src, dst), tx);
        r_map.insert((dst, src), rx);
    }

    fn take_ends(&self, local: PeerId, remote: PeerId) -> Result<(ChanTx, ChanRx), TransportError> {
        let mut s_map = self.senders.lock().unwrap_or_else(|p| p.into_inner());
        let mut r_map = self.receivers.lock().unwrap_or_else(|p| p.into_inner());
        match (s_map.remove(&(local, remote)), r_map.remove(&(local, remote))) {
            (Some(tx), Some(rx)) => Ok((tx, rx)),
            (tx, rx) => {
                // Put back whatever half is still unclaimed.
                if let Some(tx) = tx {
                    s_map.insert((local, remote), tx);
                }
                if let Some(rx) = rx {
                    r_map.insert((local, remote), rx);
                }
                Err(TransportError::ConnectionClosed)
            }
        }
    }
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Per-peer connection                                                          */
/*──────────────────────────────────────────────────────────────────────────────*/

pub struct InMemConn {
    // Dropping the sender is what the remote read loop observes as departure.
    tx: Mutex<Option<ChanTx>>,
    rx_once: Mutex<Option<ChanRx>>,
}

#[async_trait::async_trait]
impl TransportConn for InMemConn {
    async fn send_bytes(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(bytes)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn recv(&self) -> ChanRx {
        let mut guard = self.rx_once.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(rx) = guard.take() {
            rx
        } else {
            // Return an already-closed channel on subsequent calls.
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    async fn close(&self) {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Connector (binds a local peer; dials remote peer)                            */
/*──────────────────────────────────────────────────────────────────────────────*/

pub struct InMemConnector {
    network: Arc<InMemNetwork>,
    local: PeerId,
}

#[async_trait::async_trait]
impl Connector for InMemConnector {
    type Addr = PeerId;
    async fn dial(&self, remote: &PeerId) -> Result<Arc<dyn TransportConn>, TransportError> {
        let remote = *remote;
        self.network.ensure_path(self.local, remote);
        self.network.ensure_path(remote, self.local);

        let (tx, rx) = self.network.take_ends(self.local, remote)?;
        Ok(Arc::new(InMemConn {
            tx: Mutex::new(Some(tx)),
            rx_once: Mutex::new(Some(rx)),
        }))
    }
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Tests                                                                        */
/*──────────────────────────────────────────────────────────────────────────────*/

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(x: u8) -> PeerId {
        let mut b = [0u8; 16];
        b[0] = x;
        PeerId::from_bytes(b)
    }

    #[tokio::test]
    async fn basic_send_receive() {
        let net = InMemNetwork::new();
        let a = net.connector(pid(1));
        let b = net.connector(pid(2));

        let conn_a_to_b = a.dial(&pid(2)).await.unwrap();
        let conn_b_to_a = b.dial(&pid(1)).await.unwrap();

        let mut rx_b = conn_b_to_a.recv();
        conn_a_to_b.send_bytes(b"hello".to_vec()).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), b"hello");

        let mut rx_a = conn_a_to_b.recv();
        conn_b_to_a.send_bytes(b"pong".to_vec()).await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn multiple_messages_order_preserved() {
        let net = InMemNetwork::new();
        let conn_a = net.connector(pid(1)).dial(&pid(2)).await.unwrap();
        let conn_b = net.connector(pid(2)).dial(&pid(1)).await.unwrap();

        let mut rx_b = conn_b.recv();
        for i in 0..10u8 {
            conn_a.send_bytes(vec![i]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(rx_b.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn send_before_remote_dials_is_buffered() {
        let net = InMemNetwork::new();
        let conn_a = net.connector(pid(1)).dial(&pid(2)).await.unwrap();
        conn_a.send_bytes(b"early".to_vec()).await.unwrap();

        let conn_b = net.connector(pid(2)).dial(&pid(1)).await.unwrap();
        let mut rx_b = conn_b.recv();
        assert_eq!(rx_b.recv().await.unwrap(), b"early".to_vec());
    }

    #[tokio::test]
    async fn second_dial_of_same_pair_is_refused() {
        let net = InMemNetwork::new();
        let a = net.connector(pid(1));
        let _first = a.dial(&pid(2)).await.unwrap();
        let second = a.dial(&pid(2)).await;
        assert!(matches!(second, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn close_ends_remote_stream() {
        let net = InMemNetwork::new();
        let conn_a = net.connector(pid(1)).dial(&pid(2)).await.unwrap();
        let conn_b = net.connector(pid(2)).dial(&pid(1)).await.unwrap();
        let mut rx_b = conn_b.recv();

        conn_a.send_bytes(b"last".to_vec()).await.unwrap();
        conn_a.close().await;

        assert_eq!(rx_b.recv().await.unwrap(), b"last".to_vec());
        assert!(rx_b.recv().await.is_none());
        assert!(matches!(
            conn_a.send_bytes(b"late".to_vec()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn networks_are_isolated() {
        let n1 = InMemNetwork::new();
        let n2 = InMemNetwork::new();
        let a1 = n1.connector(pid(1)).dial(&pid(2)).await.unwrap();
        let _b2 = n2.connector(pid(2)).dial(&pid(1)).await.unwrap();
        let b1 = n1.connector(pid(2)).dial(&pid(1)).await.unwrap();

        let mut rx = b1.recv();
        a1.send_bytes(b"n1".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"n1".to_vec());
    }
}
