// src/network/peer_ref.rs

use alloy_primitives::{hex, B512};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// 64-byte node identity (uncompressed secp256k1 public key without prefix).
pub type NodeId = B512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerRefError {
    #[error("missing enode:// scheme")]
    MissingScheme,
    #[error("invalid node id: expected 128 hex characters")]
    InvalidId,
    #[error("missing @host:port")]
    MissingAddress,
    #[error("invalid address {0:?}: expected ip:port")]
    InvalidAddress(String),
    #[error("invalid discport {0:?}")]
    InvalidDiscPort(String),
}

/// Identity and endpoints of a remote peer, parsed from an enode URL:
/// `enode://<hex id>@<ip>:<tcp port>[?discport=<udp port>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerRef {
    id: NodeId,
    ip: IpAddr,
    tcp: u16,
    udp: u16,
}

impl PeerRef {
    pub fn new(id: NodeId, ip: IpAddr, tcp: u16, udp: u16) -> Self {
        Self { id, ip, tcp, udp }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp
    }

    pub fn udp_port(&self) -> u16 {
        self.udp
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp)
    }

    /// Whether both refs name the same peer. Endpoints are ignored: an inbound
    /// connection reports the remote's ephemeral port, not its listen port.
    pub fn same_peer(&self, other: &PeerRef) -> bool {
        self.id == other.id
    }

    /// First eight hex characters of the id, for log lines.
    pub fn short_id(&self) -> String {
        hex::encode(&self.id[..4])
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enode://{}@{}", hex::encode(self.id), self.tcp_addr())?;
        if self.udp != self.tcp {
            write!(f, "?discport={}", self.udp)?;
        }
        Ok(())
    }
}

impl FromStr for PeerRef {
    type Err = PeerRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix("enode://")
            .ok_or(PeerRefError::MissingScheme)?;
        let (id_hex, endpoint) = rest.split_once('@').ok_or(PeerRefError::MissingAddress)?;
        if id_hex.len() != 128 {
            return Err(PeerRefError::InvalidId);
        }
        let raw = hex::decode(id_hex).map_err(|_| PeerRefError::InvalidId)?;
        let id = NodeId::from_slice(&raw);

        let (host_port, query) = match endpoint.split_once('?') {
            Some((hp, q)) => (hp, Some(q)),
            None => (endpoint, None),
        };
        if host_port.is_empty() {
            return Err(PeerRefError::MissingAddress);
        }
        let sock: SocketAddr = host_port
            .parse()
            .map_err(|_| PeerRefError::InvalidAddress(host_port.to_string()))?;

        let mut udp = sock.port();
        if let Some(query) = query {
            for pair in query.split('&') {
                if let Some(v) = pair.strip_prefix("discport=") {
                    udp = v
                        .parse()
                        .map_err(|_| PeerRefError::InvalidDiscPort(v.to_string()))?;
                }
            }
        }
        Ok(Self::new(id, sock.ip(), sock.port(), udp))
    }
}

impl Serialize for PeerRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
