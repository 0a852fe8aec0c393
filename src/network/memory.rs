// src/network/memory.rs
//
// In-process transport. Dials are recorded and handed to an optional hook that
// decides what the "network" does; connections are pairs of channels.

use crate::constants::{ETH_PROTOCOL_LENGTH, ETH_PROTOCOL_NAME, ETH_PROTOCOL_VERSION};
use crate::network::peer_event::{PeerEvent, PeerFeed, Subscription};
use crate::network::peer_ref::{NodeId, PeerRef};
use crate::network::transport::{
    Connection, MsgReadWriter, NodeInfo, ProtocolInfo, Transport, TransportError, WireMessage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type DialHook = Arc<dyn Fn(&PeerRef, &PeerFeed) + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    dials: Vec<PeerRef>,
    removals: Vec<PeerRef>,
    connections: HashMap<NodeId, Connection>,
    /// Peers whose connection was handed out and not yet removed.
    taken: HashSet<NodeId>,
}

pub struct MemoryTransport {
    self_ref: Option<PeerRef>,
    name: String,
    feed: PeerFeed,
    running: AtomicBool,
    start_error: Option<String>,
    dial_hook: Option<DialHook>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new(self_ref: PeerRef) -> Self {
        Self {
            self_ref: Some(self_ref),
            name: crate::constants::DEFAULT_NODE_NAME.to_string(),
            feed: PeerFeed::new(),
            running: AtomicBool::new(false),
            start_error: None,
            dial_hook: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// A transport that starts but never learns its own identity.
    pub fn anonymous() -> Self {
        Self {
            self_ref: None,
            ..Self::new(PeerRef::new(
                NodeId::ZERO,
                std::net::Ipv4Addr::LOCALHOST.into(),
                0,
                0,
            ))
        }
    }

    /// Called on every `add_peer`, after the dial is recorded.
    pub fn with_dial_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PeerRef, &PeerFeed) + Send + Sync + 'static,
    {
        self.dial_hook = Some(Arc::new(hook));
        self
    }

    /// `start` fails with a listen error.
    pub fn failing_start(mut self, reason: &str) -> Self {
        self.start_error = Some(reason.to_string());
        self
    }

    pub fn feed(&self) -> &PeerFeed {
        &self.feed
    }

    /// Make `conn` available to `take_connection` for its peer.
    pub fn attach_connection(&self, conn: Connection) {
        let id = *conn.peer().id();
        self.state.lock().connections.insert(id, conn);
    }

    pub fn dials(&self) -> Vec<PeerRef> {
        self.state.lock().dials.clone()
    }

    pub fn removals(&self) -> Vec<PeerRef> {
        self.state.lock().removals.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if let Some(reason) = &self.start_error {
            return Err(TransportError::Listen {
                addr: "memory".to_string(),
                reason: reason.clone(),
            });
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            self.feed.reopen();
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.feed.close();
            let mut state = self.state.lock();
            state.connections.clear();
            state.taken.clear();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn self_ref(&self) -> Option<PeerRef> {
        if self.is_running() {
            self.self_ref.clone()
        } else {
            None
        }
    }

    fn node_info(&self) -> Option<NodeInfo> {
        let me = self.self_ref()?;
        Some(NodeInfo {
            id: alloy_primitives::hex::encode(me.id()),
            name: self.name.clone(),
            enode: me.to_string(),
            listen_addr: me.tcp_addr().to_string(),
            protocols: vec![ProtocolInfo {
                name: ETH_PROTOCOL_NAME.to_string(),
                version: ETH_PROTOCOL_VERSION,
                length: ETH_PROTOCOL_LENGTH,
            }],
        })
    }

    fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    fn add_peer(&self, peer: &PeerRef) {
        self.state.lock().dials.push(peer.clone());
        if let Some(hook) = &self.dial_hook {
            hook(peer, &self.feed);
        }
    }

    fn remove_peer(&self, peer: &PeerRef) {
        let had = {
            let mut state = self.state.lock();
            state.removals.push(peer.clone());
            let attached = state.connections.remove(peer.id()).is_some();
            state.taken.remove(peer.id()) || attached
        };
        if had {
            self.feed.send(PeerEvent::dropped(peer.clone()));
        }
    }

    fn take_connection(&self, peer: &PeerRef) -> Option<Connection> {
        let mut state = self.state.lock();
        let conn = state.connections.remove(peer.id())?;
        state.taken.insert(*peer.id());
        Some(conn)
    }
}

/// One end of an in-memory connection.
pub struct MemoryConn {
    peer: PeerRef,
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WireMessage>>,
}

impl MemoryConn {
    /// Push an arbitrary frame, including ones no encoder would produce.
    pub fn send_raw(&self, msg: WireMessage) -> Result<(), TransportError> {
        self.tx.send(msg).map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl MsgReadWriter for MemoryConn {
    fn peer(&self) -> &PeerRef {
        &self.peer
    }

    async fn read_msg(&self) -> Result<WireMessage, TransportError> {
        self.rx.lock().await.recv().await.ok_or(TransportError::Eof)
    }

    async fn send_msg(&self, code: u64, payload: Vec<u8>) -> Result<(), TransportError> {
        self.send_raw(WireMessage::new(code, payload))
    }
}

/// Connected pair. The first end talks to `right`, the second to `left`.
pub fn pipe(left: PeerRef, right: PeerRef) -> (MemoryConn, MemoryConn) {
    let (l_tx, r_rx) = mpsc::unbounded_channel();
    let (r_tx, l_rx) = mpsc::unbounded_channel();
    (
        MemoryConn {
            peer: right,
            tx: l_tx,
            rx: tokio::sync::Mutex::new(l_rx),
        },
        MemoryConn {
            peer: left,
            tx: r_tx,
            rx: tokio::sync::Mutex::new(r_rx),
        },
    )
}
