//! Central place for application-wide constants and default values.

use alloy_primitives::{b256, B256};
use std::time::Duration;

/// Default node name advertised in `NodeInfo` (can be overridden in config)
pub const DEFAULT_NODE_NAME: &str = "devp2ping";

/// Left padding used to align log lines with those that include emoji prefixes.
pub const ICON_PLACEHOLDER: &str = "   ";

/// Application / crate version (populated from Cargo.toml via env! macro)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default p2p listen address (Go-style, all interfaces).
pub const DEFAULT_LISTEN_ADDR: &str = ":30301";
/// Default RPC listen address.
pub const DEFAULT_RPC_ADDR: &str = ":8544";

/// Seconds `addpeer` waits for a definitive connect/drop outcome.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Seconds the RPC `add_peer` waits when the caller gives no timeout.
pub const DEFAULT_RPC_ADD_PEER_TIMEOUT: Duration = Duration::from_secs(15);
/// Shared timeout for both legs of the status exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// Discovery request/response allowance.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-subscriber buffer of the peer event feed.
pub const PEER_FEED_BUFFER: usize = 64;

// eth sub-protocol, version 63.
pub const ETH_PROTOCOL_NAME: &str = "eth";
pub const ETH_PROTOCOL_VERSION: u32 = 63;
pub const ETH_PROTOCOL_LENGTH: u64 = 17;
/// Maximum size of one eth message payload.
pub const ETH_MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Upper bound on one transport frame; larger frames are a transport error.
/// Kept above `ETH_MAX_MESSAGE_SIZE` so oversized eth messages still reach the codec.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Mainnet network id.
pub const MAINNET_NETWORK_ID: u64 = 1;
/// Mainnet genesis block hash.
pub const MAINNET_GENESIS_HASH: B256 =
    b256!("d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3");
/// Mainnet genesis difficulty (0x400000000).
pub const MAINNET_GENESIS_DIFFICULTY: u64 = 17_179_869_184;

/// Human friendly composite version string used in logs.
pub fn full_version() -> String {
    format!(
        "v{} ({}/{})",
        APP_VERSION, ETH_PROTOCOL_NAME, ETH_PROTOCOL_VERSION
    )
}
