// src/network/transport.rs
//
// Seam between the orchestration logic and whatever actually moves bytes.
// Dialing, framing and peer bookkeeping live behind `Transport`; one open
// connection is a `MsgReadWriter`.

use crate::network::peer_event::Subscription;
use crate::network::peer_ref::PeerRef;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on {addr}: {reason}")]
    Listen { addr: String, reason: String },
    #[error("failed to dial {peer}: {reason}")]
    Dial { peer: String, reason: String },
    #[error("transport not running")]
    NotRunning,
    #[error("connection closed by peer")]
    Eof,
    #[error("disconnected")]
    Disconnected,
    #[error("frame of {size} bytes exceeds limit {max}")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Remote closed the stream (as opposed to a local teardown or an I/O fault).
    pub fn is_eof(&self) -> bool {
        match self {
            TransportError::Eof => true,
            TransportError::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

/// One code-tagged, length-delimited unit of application protocol data.
///
/// Owned by whoever read it. The transport delivers one message at a time per
/// connection, so a reader either decodes the payload or calls `discard`.
#[derive(Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub code: u64,
    pub size: u32,
    pub payload: Vec<u8>,
}

impl WireMessage {
    pub fn new(code: u64, payload: Vec<u8>) -> Self {
        Self {
            code,
            size: payload.len() as u32,
            payload,
        }
    }

    /// Frame with no body at all.
    pub fn empty(code: u64) -> Self {
        Self::new(code, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0 || self.payload.is_empty()
    }

    /// Explicitly drop an unwanted message.
    pub fn discard(self) {}
}

impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg #{:#04x} ({} bytes)", self.code, self.size)
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[async_trait]
pub trait MsgReadWriter: Send + Sync {
    /// Remote end of this connection.
    fn peer(&self) -> &PeerRef;
    /// Next whole message. Reads and sends may run concurrently.
    async fn read_msg(&self) -> Result<WireMessage, TransportError>;
    async fn send_msg(&self, code: u64, payload: Vec<u8>) -> Result<(), TransportError>;
}

pub type Connection = Box<dyn MsgReadWriter>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub name: String,
    pub version: u32,
    pub length: u64,
}

/// Self description returned by a running transport.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub enode: String,
    pub listen_addr: String,
    pub protocols: Vec<ProtocolInfo>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self) -> Result<(), TransportError>;
    /// Idempotent.
    async fn stop(&self);
    fn is_running(&self) -> bool;
    /// Our own address record; `None` until started.
    fn self_ref(&self) -> Option<PeerRef>;
    fn node_info(&self) -> Option<NodeInfo>;
    /// Register for peer lifecycle events. Registration is complete when this returns.
    fn subscribe(&self) -> Subscription;
    /// Ask the transport to connect; the result arrives as a peer event.
    fn add_peer(&self, peer: &PeerRef);
    /// Disconnect a peer if connected. Does not wait for the drop event.
    fn remove_peer(&self, peer: &PeerRef);
    /// Hand over exclusive ownership of an established connection.
    fn take_connection(&self, peer: &PeerRef) -> Option<Connection>;
}
