// src/network/discovery.rs
//
// Request/response probing over UDP: ping/pong and findnode/neighbors.
// Packets are single JSON datagrams. No routing table is kept.

use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::network::peer_ref::{NodeId, PeerRef};
use crate::utils::addr::normalize_listen_addr;
use alloy_primitives::hex;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAX_PACKET_SIZE: usize = 8192;
/// Most nodes returned in one neighbors packet.
pub const MAX_NEIGHBORS: usize = 16;
/// A ping keeps its sender bonded for this long.
pub const DEFAULT_BOND_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_BONDS: usize = 1024;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("no {expected} from {from} within {after:?}")]
    Timeout {
        expected: &'static str,
        from: SocketAddr,
        after: Duration,
    },
    #[error("packet encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    Ping { from: PeerRef, nonce: u64 },
    Pong { nonce: u64 },
    FindNode { target: String },
    Neighbors { nodes: Vec<PeerRef> },
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Ping { .. } => "ping",
            Packet::Pong { .. } => "pong",
            Packet::FindNode { .. } => "findnode",
            Packet::Neighbors { .. } => "neighbors",
        }
    }
}

async fn bind_socket(listen_addr: &str) -> Result<UdpSocket, DiscoveryError> {
    let addr = normalize_listen_addr(listen_addr);
    UdpSocket::bind(&addr)
        .await
        .map_err(|e| DiscoveryError::Bind {
            addr,
            reason: e.to_string(),
        })
}

async fn send_packet(
    socket: &UdpSocket,
    to: SocketAddr,
    packet: &Packet,
) -> Result<(), DiscoveryError> {
    let bytes = serde_json::to_vec(packet)?;
    socket.send_to(&bytes, to).await?;
    Ok(())
}

/// Local end of a probe session. One request is outstanding at a time.
pub struct DiscoveryProbe {
    socket: UdpSocket,
    self_ref: PeerRef,
    resp_timeout: Duration,
}

impl DiscoveryProbe {
    pub async fn bind(
        listen_addr: &str,
        self_id: NodeId,
        resp_timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let socket = bind_socket(listen_addr).await?;
        let local = socket.local_addr()?;
        Ok(Self {
            socket,
            self_ref: PeerRef::new(self_id, local.ip(), local.port(), local.port()),
            resp_timeout,
        })
    }

    pub fn self_ref(&self) -> &PeerRef {
        &self.self_ref
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the first packet from `from` that `accept` maps to a value.
    async fn await_reply<T>(
        &self,
        from: SocketAddr,
        expected: &'static str,
        mut accept: impl FnMut(Packet) -> Option<T>,
    ) -> Result<T, DiscoveryError> {
        let wait = async {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                let (n, src) = self.socket.recv_from(&mut buf).await?;
                if src != from {
                    continue;
                }
                match serde_json::from_slice::<Packet>(&buf[..n]) {
                    Ok(packet) => {
                        if let Some(v) = accept(packet) {
                            return Ok::<T, DiscoveryError>(v);
                        }
                    }
                    Err(e) => {
                        emit_network_event(
                            "discovery",
                            LogLevel::Debug,
                            "malformed_packet",
                            Some(src.to_string()),
                            Some(e.to_string()),
                        );
                    }
                }
            }
        };
        match tokio::time::timeout(self.resp_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::Timeout {
                expected,
                from,
                after: self.resp_timeout,
            }),
        }
    }

    /// Ping `target` and return the round-trip time of the matching pong.
    pub async fn ping(&self, target: &PeerRef) -> Result<Duration, DiscoveryError> {
        let to = target.udp_addr();
        let nonce = rand::random::<u64>();
        let started = Instant::now();
        send_packet(
            &self.socket,
            to,
            &Packet::Ping {
                from: self.self_ref.clone(),
                nonce,
            },
        )
        .await?;
        let result = self
            .await_reply(to, "pong", |p| match p {
                Packet::Pong { nonce: n } if n == nonce => Some(()),
                _ => None,
            })
            .await;
        match result {
            Ok(()) => {
                let rtt = started.elapsed();
                emit_network_event(
                    "discovery",
                    LogLevel::Info,
                    "pong",
                    Some(to.to_string()),
                    Some(format!("rtt={:?}", rtt)),
                );
                Ok(rtt)
            }
            Err(e) => {
                emit_network_event(
                    "discovery",
                    LogLevel::Info,
                    "ping_failed",
                    Some(to.to_string()),
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Ask `target` for nodes close to `lookup`. Pings first so the remote knows us.
    pub async fn find_node(
        &self,
        target: &PeerRef,
        lookup: &NodeId,
    ) -> Result<Vec<PeerRef>, DiscoveryError> {
        self.ping(target).await?;
        let to = target.udp_addr();
        send_packet(
            &self.socket,
            to,
            &Packet::FindNode {
                target: hex::encode(lookup),
            },
        )
        .await?;
        let nodes = self
            .await_reply(to, "neighbors", |p| match p {
                Packet::Neighbors { nodes } => Some(nodes),
                _ => None,
            })
            .await?;
        emit_network_event(
            "discovery",
            LogLevel::Info,
            "neighbors",
            Some(to.to_string()),
            Some(format!("count={}", nodes.len())),
        );
        for node in &nodes {
            emit_network_event(
                "discovery",
                LogLevel::Debug,
                "neighbor",
                Some(node.udp_addr().to_string()),
                Some(node.to_string()),
            );
        }
        Ok(nodes)
    }

    /// Nodes the target considers close to us.
    pub async fn neighbors(&self, target: &PeerRef) -> Result<Vec<PeerRef>, DiscoveryError> {
        let own = *self.self_ref.id();
        self.find_node(target, &own).await
    }
}

/// Endpoints that pinged recently. Entries expire after `ttl`; when full the
/// oldest bond makes room.
struct Bonds {
    ttl: Duration,
    max: usize,
    seen: HashMap<SocketAddr, Instant>,
}

impl Bonds {
    fn new(ttl: Duration, max: usize) -> Self {
        Self {
            ttl,
            max: max.max(1),
            seen: HashMap::new(),
        }
    }

    fn insert(&mut self, addr: SocketAddr, now: Instant) {
        let ttl = self.ttl;
        self.seen.retain(|_, at| now.duration_since(*at) < ttl);
        if self.seen.len() >= self.max && !self.seen.contains_key(&addr) {
            let oldest = self.seen.iter().min_by_key(|(_, at)| **at).map(|(a, _)| *a);
            if let Some(oldest) = oldest {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(addr, now);
    }

    fn is_bonded(&self, addr: &SocketAddr, now: Instant) -> bool {
        self.seen
            .get(addr)
            .is_some_and(|at| now.duration_since(*at) < self.ttl)
    }
}

/// Answers pings, and findnode requests from endpoints that pinged first.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    nodes: Vec<PeerRef>,
    bonds: Mutex<Bonds>,
}

impl DiscoveryResponder {
    pub async fn bind(listen_addr: &str, nodes: Vec<PeerRef>) -> Result<Self, DiscoveryError> {
        let socket = bind_socket(listen_addr).await?;
        Ok(Self {
            socket,
            nodes,
            bonds: Mutex::new(Bonds::new(DEFAULT_BOND_TTL, DEFAULT_MAX_BONDS)),
        })
    }

    /// Override how long and how many pingers stay bonded.
    pub fn with_bond_limits(self, ttl: Duration, max: usize) -> Self {
        Self {
            bonds: Mutex::new(Bonds::new(ttl, max)),
            ..self
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (n, src) = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => match r {
                    Ok(v) => v,
                    Err(e) => {
                        emit_network_event("discovery", LogLevel::Warn, "recv_failed", None, Some(e.to_string()));
                        continue;
                    }
                },
            };
            let packet = match serde_json::from_slice::<Packet>(&buf[..n]) {
                Ok(p) => p,
                Err(e) => {
                    emit_network_event(
                        "discovery",
                        LogLevel::Debug,
                        "malformed_packet",
                        Some(src.to_string()),
                        Some(e.to_string()),
                    );
                    continue;
                }
            };
            if let Err(e) = self.handle(src, packet).await {
                emit_network_event(
                    "discovery",
                    LogLevel::Warn,
                    "reply_failed",
                    Some(src.to_string()),
                    Some(e.to_string()),
                );
            }
        }
    }

    async fn handle(&self, src: SocketAddr, packet: Packet) -> Result<(), DiscoveryError> {
        emit_network_event(
            "discovery",
            LogLevel::Debug,
            packet.kind(),
            Some(src.to_string()),
            None,
        );
        match packet {
            Packet::Ping { nonce, .. } => {
                self.bonds.lock().insert(src, Instant::now());
                send_packet(&self.socket, src, &Packet::Pong { nonce }).await
            }
            Packet::FindNode { .. } => {
                if !self.bonds.lock().is_bonded(&src, Instant::now()) {
                    emit_network_event(
                        "discovery",
                        LogLevel::Debug,
                        "findnode_unbonded",
                        Some(src.to_string()),
                        None,
                    );
                    return Ok(());
                }
                let nodes = self.nodes.iter().take(MAX_NEIGHBORS).cloned().collect();
                send_packet(&self.socket, src, &Packet::Neighbors { nodes }).await
            }
            Packet::Pong { .. } | Packet::Neighbors { .. } => Ok(()),
        }
    }
}
