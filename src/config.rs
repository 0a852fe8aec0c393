use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_LISTEN_ADDR, DEFAULT_NODE_NAME,
    DEFAULT_RESPONSE_TIMEOUT, DEFAULT_RPC_ADDR, DEFAULT_RPC_ADD_PEER_TIMEOUT, ETH_MAX_MESSAGE_SIZE,
    MAX_FRAME_SIZE,
};
use crate::network::orchestrator::OrchestratorConfig;
use crate::network::peer_ref::NodeId;
use crate::network::tcp::TcpTransportConfig;
use crate::protocol::handshake::{HandshakeConfig, ValidationPolicy};
use crate::protocol::messages::StatusData;
use crate::rpc::service::ServiceConfig;
use alloy_primitives::{hex, B256, U256};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Top-level configuration. Every field is optional; resolver methods below
/// apply the defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Name advertised in node info (default "devp2ping")
    pub node_name: Option<String>,
    /// p2p listen address; Go-style ":port" binds all interfaces
    pub listen_addr: Option<String>,
    pub node: Option<NodeConfig>,
    pub dial: Option<DialConfig>,
    pub handshake: Option<HandshakeSection>,
    pub observe: Option<ObserveConfig>,
    pub rpc: Option<RpcConfig>,
    pub discovery: Option<DiscoveryConfig>,
    /// Logging / events configuration
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeConfig {
    /// Fixed 128-hex-character node id. Random per process when unset.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DialConfig {
    /// Seconds to wait for a connect/drop outcome (default 30)
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HandshakeSection {
    /// Run the status exchange after connecting (default true)
    pub enabled: Option<bool>,
    /// Shared timeout for both legs (default 2000)
    pub timeout_ms: Option<u64>,
    /// strict | annotate | off (default annotate)
    pub policy: Option<ValidationPolicy>,
    pub protocol_version: Option<u32>,
    pub network_id: Option<u64>,
    /// 0x-prefixed 32-byte hash
    pub genesis_hash: Option<String>,
    /// Decimal or 0x-prefixed hex
    pub total_difficulty: Option<String>,
    pub max_message_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ObserveConfig {
    /// Seconds to keep reading after a successful attempt (default 0)
    pub secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RpcConfig {
    pub listen_addr: Option<String>,
    /// Used when an add_peer request carries no timeout (default 15)
    pub add_peer_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscoveryConfig {
    /// Milliseconds to wait for each discovery reply (default 500)
    pub resp_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Path to a rotated JSON-lines event log. No file log when unset.
    pub json_path: Option<String>,
    /// Max size in bytes before rotation (default 5MB)
    pub json_max_bytes: Option<usize>,
    /// Number of rotated files to retain (default 3)
    pub json_rotate: Option<u32>,
    /// Disable console sink (default false)
    pub disable_console: Option<bool>,
    /// Minimum level written to stderr (default info)
    pub console_level: Option<String>,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn node_name(&self) -> String {
        self.node_name
            .clone()
            .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string())
    }

    pub fn listen_addr(&self) -> String {
        self.listen_addr
            .clone()
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
    }

    pub fn node_id(&self) -> Result<Option<NodeId>, ConfigError> {
        let Some(raw) = self.node.as_ref().and_then(|n| n.id.as_deref()) else {
            return Ok(None);
        };
        let raw = raw.trim().trim_start_matches("0x");
        if raw.len() != 128 {
            return Err(invalid("node.id", "expected 128 hex characters"));
        }
        let bytes = hex::decode(raw).map_err(|e| invalid("node.id", e))?;
        Ok(Some(NodeId::from_slice(&bytes)))
    }

    pub fn connect_timeout(&self) -> Duration {
        self.dial
            .as_ref()
            .and_then(|d| d.connect_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn observe_duration(&self) -> Duration {
        self.observe
            .as_ref()
            .and_then(|o| o.secs)
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO)
    }

    pub fn rpc_listen_addr(&self) -> String {
        self.rpc
            .as_ref()
            .and_then(|r| r.listen_addr.clone())
            .unwrap_or_else(|| DEFAULT_RPC_ADDR.to_string())
    }

    pub fn response_timeout(&self) -> Duration {
        self.discovery
            .as_ref()
            .and_then(|d| d.resp_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RESPONSE_TIMEOUT)
    }

    pub fn handshake_enabled(&self) -> bool {
        self.handshake
            .as_ref()
            .and_then(|h| h.enabled)
            .unwrap_or(true)
    }

    /// `None` when the status exchange is disabled.
    pub fn handshake_config(&self) -> Option<HandshakeConfig> {
        if !self.handshake_enabled() {
            return None;
        }
        let hs = self.handshake.clone().unwrap_or_default();
        Some(HandshakeConfig {
            timeout: hs
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            policy: hs.policy.unwrap_or_default(),
            max_message_size: hs.max_message_size.unwrap_or(ETH_MAX_MESSAGE_SIZE),
        })
    }

    /// Status we announce: mainnet genesis unless overridden.
    pub fn local_status(&self) -> Result<StatusData, ConfigError> {
        let mut status = StatusData::mainnet_genesis();
        let Some(hs) = &self.handshake else {
            return Ok(status);
        };
        if let Some(v) = hs.protocol_version {
            status.protocol_version = v;
        }
        if let Some(id) = hs.network_id {
            status.network_id = id;
        }
        if let Some(genesis) = &hs.genesis_hash {
            let hash = B256::from_str(genesis.trim()).map_err(|e| invalid("handshake.genesis_hash", e))?;
            status.genesis_block = hash;
            status.current_block = hash;
        }
        if let Some(td) = &hs.total_difficulty {
            status.total_difficulty =
                U256::from_str(td.trim()).map_err(|e| invalid("handshake.total_difficulty", e))?;
        }
        Ok(status)
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        Ok(OrchestratorConfig {
            handshake: self.handshake_config(),
            local_status: self.local_status()?,
            observe: self.observe_duration(),
            disconnect_on_finish: true,
        })
    }

    pub fn service_config(&self) -> Result<ServiceConfig, ConfigError> {
        Ok(ServiceConfig {
            orchestrator: self.orchestrator_config()?,
            add_peer_timeout: self
                .rpc
                .as_ref()
                .and_then(|r| r.add_peer_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RPC_ADD_PEER_TIMEOUT),
        })
    }

    pub fn tcp_transport_config(&self) -> Result<TcpTransportConfig, ConfigError> {
        let max_message = self
            .handshake
            .as_ref()
            .and_then(|h| h.max_message_size)
            .unwrap_or(ETH_MAX_MESSAGE_SIZE);
        Ok(TcpTransportConfig {
            listen_addr: self.listen_addr(),
            node_id: self.node_id()?,
            name: self.node_name(),
            // Oversized eth messages must still reach the codec to be classified.
            max_frame_size: MAX_FRAME_SIZE.max(max_message),
            ..TcpTransportConfig::default()
        })
    }
}
