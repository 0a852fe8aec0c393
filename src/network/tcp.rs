// src/network/tcp.rs
//
// Plaintext framed TCP transport. After connecting, both ends send their
// 64-byte node id; after that every message is
// [code: u32 BE][size: u32 BE][payload].

use crate::constants::{
    DEFAULT_LISTEN_ADDR, DEFAULT_NODE_NAME, ETH_PROTOCOL_LENGTH, ETH_PROTOCOL_NAME,
    ETH_PROTOCOL_VERSION, MAX_FRAME_SIZE,
};
use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::network::peer_event::{PeerEvent, PeerFeed, Subscription};
use crate::network::peer_ref::{NodeId, PeerRef};
use crate::network::transport::{
    Connection, MsgReadWriter, NodeInfo, ProtocolInfo, Transport, TransportError, WireMessage,
};
use crate::utils::addr::normalize_listen_addr;
use alloy_primitives::hex;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn log_network_event(level: LogLevel, action: &str, addr: Option<String>, detail: Option<String>) {
    emit_network_event("tcp", level, action, addr, detail);
}

#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Go-style `":port"` is accepted.
    pub listen_addr: String,
    /// Random when unset.
    pub node_id: Option<NodeId>,
    pub name: String,
    pub max_frame_size: u32,
    /// Bound on TCP connect plus the id exchange.
    pub dial_timeout: Duration,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            node_id: None,
            name: DEFAULT_NODE_NAME.to_string(),
            max_frame_size: MAX_FRAME_SIZE,
            dial_timeout: Duration::from_secs(5),
        }
    }
}

pub fn random_node_id() -> NodeId {
    let mut raw = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut raw);
    NodeId::from(raw)
}

struct PeerSlot {
    peer: PeerRef,
    cancel: CancellationToken,
    conn: Option<TcpConn>,
    generation: u64,
}

#[derive(Default)]
struct TcpState {
    local: Option<SocketAddr>,
    shutdown: Option<CancellationToken>,
    peers: HashMap<NodeId, PeerSlot>,
}

struct Shared {
    id: NodeId,
    name: String,
    max_frame: u32,
    dial_timeout: Duration,
    feed: PeerFeed,
    generation: AtomicU64,
    state: Mutex<TcpState>,
}

impl Shared {
    fn shutdown_token(&self) -> Option<CancellationToken> {
        self.state.lock().shutdown.clone()
    }

    /// Exchange ids over a fresh stream and register the connection.
    async fn establish(
        self: &Arc<Self>,
        mut stream: TcpStream,
        expected: Option<&PeerRef>,
        parent: &CancellationToken,
    ) -> Result<PeerRef, TransportError> {
        let remote_addr = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);

        let remote_id = tokio::time::timeout(self.dial_timeout, async {
            stream.write_all(self.id.as_slice()).await?;
            stream.flush().await?;
            let mut raw = [0u8; 64];
            stream.read_exact(&mut raw).await?;
            Ok::<_, std::io::Error>(NodeId::from(raw))
        })
        .await
        .map_err(|_| TransportError::Dial {
            peer: remote_addr.to_string(),
            reason: "identity exchange timed out".to_string(),
        })?
        .map_err(map_io)?;

        let peer = match expected {
            Some(want) if *want.id() != remote_id => {
                return Err(TransportError::Dial {
                    peer: want.to_string(),
                    reason: format!("remote identified as {}", hex::encode(&remote_id[..4])),
                });
            }
            Some(want) => want.clone(),
            None => PeerRef::new(
                remote_id,
                remote_addr.ip(),
                remote_addr.port(),
                remote_addr.port(),
            ),
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = parent.child_token();
        let (reader, writer) = stream.into_split();
        let conn = TcpConn {
            peer: peer.clone(),
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            cancel: cancel.clone(),
            max_frame: self.max_frame,
            shared: Arc::downgrade(self),
            generation,
        };
        let replaced = self.state.lock().peers.insert(
            remote_id,
            PeerSlot {
                peer: peer.clone(),
                cancel,
                conn: Some(conn),
                generation,
            },
        );
        if let Some(old) = replaced {
            old.cancel.cancel();
        }

        log_network_event(
            LogLevel::Info,
            "peer_connected",
            Some(remote_addr.to_string()),
            Some(format!(
                "id={} direction={}",
                peer.short_id(),
                if expected.is_some() { "outbound" } else { "inbound" }
            )),
        );
        self.feed.send(PeerEvent::added(peer.clone()));
        Ok(peer)
    }

    /// Forget the slot registered under `generation` and announce the drop.
    fn release(&self, id: &NodeId, generation: u64) {
        let removed = {
            let mut state = self.state.lock();
            match state.peers.get(id) {
                Some(slot) if slot.generation == generation => state.peers.remove(id),
                _ => None,
            }
        };
        if let Some(slot) = removed {
            slot.cancel.cancel();
            log_network_event(
                LogLevel::Info,
                "peer_disconnected",
                Some(slot.peer.tcp_addr().to_string()),
                Some(format!("id={}", slot.peer.short_id())),
            );
            self.feed.send(PeerEvent::dropped(slot.peer.clone()));
        }
    }
}

pub struct TcpTransport {
    listen_addr: String,
    shared: Arc<Shared>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        let id = config.node_id.unwrap_or_else(random_node_id);
        Self {
            listen_addr: config.listen_addr,
            shared: Arc::new(Shared {
                id,
                name: config.name,
                max_frame: config.max_frame_size,
                dial_timeout: config.dial_timeout,
                feed: PeerFeed::new(),
                generation: AtomicU64::new(0),
                state: Mutex::new(TcpState::default()),
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.shared.id
    }

    /// Bound listen address; `None` until started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.state.lock().local
    }

    pub fn connected_peers(&self) -> Vec<PeerRef> {
        self.shared
            .state
            .lock()
            .peers
            .values()
            .map(|s| s.peer.clone())
            .collect()
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    log_network_event(
                        LogLevel::Debug,
                        "incoming_connection",
                        Some(peer_addr.to_string()),
                        None,
                    );
                    let shared = shared.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = shared.establish(stream, None, &shutdown).await {
                            log_network_event(
                                LogLevel::Warn,
                                "inbound_failed",
                                Some(peer_addr.to_string()),
                                Some(e.to_string()),
                            );
                        }
                    });
                }
                Err(e) => {
                    log_network_event(LogLevel::Error, "accept_failed", None, Some(e.to_string()));
                }
            },
        }
    }
    log_network_event(LogLevel::Debug, "listener_closed", None, None);
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        let addr = normalize_listen_addr(&self.listen_addr);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::Listen {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let local = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        {
            let mut state = self.shared.state.lock();
            if state.shutdown.is_some() {
                return Ok(());
            }
            state.local = Some(local);
            state.shutdown = Some(shutdown.clone());
        }
        self.shared.feed.reopen();
        log_network_event(
            LogLevel::Info,
            "listener_bind",
            Some(local.to_string()),
            Some(format!("id={}", hex::encode(&self.shared.id[..4]))),
        );
        tokio::spawn(accept_loop(self.shared.clone(), listener, shutdown));
        Ok(())
    }

    async fn stop(&self) {
        let (token, slots) = {
            let mut state = self.shared.state.lock();
            let Some(token) = state.shutdown.take() else {
                return;
            };
            state.local = None;
            let slots: Vec<PeerSlot> = state.peers.drain().map(|(_, s)| s).collect();
            (token, slots)
        };
        token.cancel();
        drop(slots);
        self.shared.feed.close();
        log_network_event(LogLevel::Info, "transport_stopped", None, None);
    }

    fn is_running(&self) -> bool {
        self.shared.state.lock().shutdown.is_some()
    }

    fn self_ref(&self) -> Option<PeerRef> {
        let local = self.local_addr()?;
        let ip = match local.ip() {
            IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Some(PeerRef::new(self.shared.id, ip, local.port(), local.port()))
    }

    fn node_info(&self) -> Option<NodeInfo> {
        let me = self.self_ref()?;
        let listen_addr = self.local_addr()?.to_string();
        Some(NodeInfo {
            id: hex::encode(self.shared.id),
            name: self.shared.name.clone(),
            enode: me.to_string(),
            listen_addr,
            protocols: vec![ProtocolInfo {
                name: ETH_PROTOCOL_NAME.to_string(),
                version: ETH_PROTOCOL_VERSION,
                length: ETH_PROTOCOL_LENGTH,
            }],
        })
    }

    fn subscribe(&self) -> Subscription {
        self.shared.feed.subscribe()
    }

    fn add_peer(&self, peer: &PeerRef) {
        let Some(shutdown) = self.shared.shutdown_token() else {
            log_network_event(
                LogLevel::Warn,
                "dial_skipped",
                Some(peer.tcp_addr().to_string()),
                Some(TransportError::NotRunning.to_string()),
            );
            return;
        };
        let already = self.shared.state.lock().peers.contains_key(peer.id());
        if already {
            self.shared.feed.send(PeerEvent::added(peer.clone()));
            return;
        }

        let shared = self.shared.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            let addr = peer.tcp_addr();
            log_network_event(
                LogLevel::Info,
                "dial_start",
                Some(addr.to_string()),
                Some(format!("id={}", peer.short_id())),
            );
            let connect = tokio::time::timeout(shared.dial_timeout, TcpStream::connect(addr));
            let result = tokio::select! {
                _ = shutdown.cancelled() => return,
                r = connect => match r {
                    Ok(Ok(stream)) => shared.establish(stream, Some(&peer), &shutdown).await,
                    Ok(Err(e)) => Err(TransportError::Dial { peer: addr.to_string(), reason: e.to_string() }),
                    Err(_) => Err(TransportError::Dial { peer: addr.to_string(), reason: "connect timed out".to_string() }),
                },
            };
            if let Err(e) = result {
                log_network_event(
                    LogLevel::Warn,
                    "dial_failed",
                    Some(addr.to_string()),
                    Some(e.to_string()),
                );
                shared.feed.send(PeerEvent::dropped(peer));
            }
        });
    }

    fn remove_peer(&self, peer: &PeerRef) {
        let generation = self
            .shared
            .state
            .lock()
            .peers
            .get(peer.id())
            .map(|s| s.generation);
        if let Some(generation) = generation {
            self.shared.release(peer.id(), generation);
        }
    }

    fn take_connection(&self, peer: &PeerRef) -> Option<Connection> {
        let conn = self
            .shared
            .state
            .lock()
            .peers
            .get_mut(peer.id())
            .and_then(|s| s.conn.take())?;
        Some(Box::new(conn))
    }
}

/// One established TCP connection. Dropping it disconnects the peer.
pub struct TcpConn {
    peer: PeerRef,
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    cancel: CancellationToken,
    max_frame: u32,
    shared: Weak<Shared>,
    generation: u64,
}

impl TcpConn {
    fn release(&self) {
        self.cancel.cancel();
        if let Some(shared) = self.shared.upgrade() {
            shared.release(self.peer.id(), self.generation);
        }
    }
}

impl Drop for TcpConn {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl MsgReadWriter for TcpConn {
    fn peer(&self) -> &PeerRef {
        &self.peer
    }

    async fn read_msg(&self) -> Result<WireMessage, TransportError> {
        let mut reader = self.reader.lock().await;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Disconnected),
            r = read_frame(&mut *reader, self.max_frame) => r,
        };
        // Any read failure leaves the stream unusable.
        if result.is_err() {
            self.release();
        }
        result
    }

    async fn send_msg(&self, code: u64, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Disconnected);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Disconnected),
            r = write_frame(&mut *writer, code, &payload) => r,
        }
    }
}

fn map_io(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Eof
    } else {
        TransportError::Io(e)
    }
}

/// Read one `[code][size][payload]` frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: u32,
) -> Result<WireMessage, TransportError> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).await.map_err(map_io)?;
    let code = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
    let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if size > max {
        return Err(TransportError::FrameTooLarge { size, max });
    }
    let mut payload = vec![0u8; size as usize];
    reader.read_exact(&mut payload).await.map_err(map_io)?;
    Ok(WireMessage {
        code,
        size,
        payload,
    })
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    code: u64,
    payload: &[u8],
) -> Result<(), TransportError> {
    let code = u32::try_from(code).map_err(|_| {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("message code {:#x} does not fit the frame header", code),
        ))
    })?;
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&code.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
