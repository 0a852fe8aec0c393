// src/protocol/handshake.rs
//
// Status exchange. Both legs run at once under one timer; neither side waits
// for the other's status before sending its own.

use crate::constants::{DEFAULT_HANDSHAKE_TIMEOUT, ETH_MAX_MESSAGE_SIZE};
use crate::events::model::LogLevel;
use crate::network::events::emit_protocol_event;
use crate::network::transport::MsgReadWriter;
use crate::protocol::codec::decode_exact;
use crate::protocol::error::{DecodeError, HandshakeError};
use crate::protocol::messages::{codes, rlp_bytes, StatusData};
use serde::Deserialize;
use std::time::Duration;

/// What to do when the remote status disagrees with ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// First mismatch fails the exchange.
    Strict,
    /// Mismatches are reported alongside a successful exchange.
    #[default]
    Annotate,
    /// No checks.
    Off,
}

impl std::str::FromStr for ValidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ValidationPolicy::Strict),
            "annotate" => Ok(ValidationPolicy::Annotate),
            "off" | "none" => Ok(ValidationPolicy::Off),
            other => Err(format!("unknown validation policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub timeout: Duration,
    pub policy: ValidationPolicy,
    pub max_message_size: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            policy: ValidationPolicy::default(),
            max_message_size: ETH_MAX_MESSAGE_SIZE,
        }
    }
}

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReport {
    pub remote: StatusData,
    /// Empty under `Strict` (a mismatch is an error there) and `Off`.
    pub mismatches: Vec<DecodeError>,
}

impl HandshakeReport {
    pub fn is_compatible(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Send `local` and read the remote status concurrently, then validate.
pub async fn exchange_status(
    conn: &dyn MsgReadWriter,
    local: &StatusData,
    cfg: &HandshakeConfig,
) -> Result<HandshakeReport, HandshakeError> {
    let peer = conn.peer().short_id();
    let send = async {
        conn.send_msg(codes::STATUS, rlp_bytes(local))
            .await
            .map_err(HandshakeError::from)
    };
    let recv = read_status(conn, cfg.max_message_size);

    let remote = match tokio::time::timeout(cfg.timeout, async {
        tokio::try_join!(send, recv)
    })
    .await
    {
        Ok(Ok(((), remote))) => remote,
        Ok(Err(e)) => {
            emit_protocol_event(
                LogLevel::Warn,
                "handshake_failed",
                Some(peer),
                Some(codes::STATUS),
                Some(e.to_string()),
            );
            return Err(e);
        }
        Err(_) => {
            emit_protocol_event(
                LogLevel::Info,
                "handshake_timeout",
                Some(peer),
                Some(codes::STATUS),
                Some(format!("after {:?}", cfg.timeout)),
            );
            return Err(HandshakeError::Timeout(cfg.timeout));
        }
    };

    let mismatches = match cfg.policy {
        ValidationPolicy::Off => Vec::new(),
        ValidationPolicy::Strict => {
            if let Some(first) = validate_status(local, &remote).into_iter().next() {
                emit_protocol_event(
                    LogLevel::Warn,
                    "handshake_rejected",
                    Some(peer),
                    Some(codes::STATUS),
                    Some(first.to_string()),
                );
                return Err(HandshakeError::Protocol(first));
            }
            Vec::new()
        }
        ValidationPolicy::Annotate => validate_status(local, &remote),
    };

    for m in &mismatches {
        emit_protocol_event(
            LogLevel::Warn,
            "status_mismatch",
            Some(peer.clone()),
            Some(codes::STATUS),
            Some(m.to_string()),
        );
    }
    emit_protocol_event(
        LogLevel::Info,
        "handshake_ok",
        Some(peer),
        Some(codes::STATUS),
        Some(format!(
            "version={} network={} td={} head={}",
            remote.protocol_version, remote.network_id, remote.total_difficulty, remote.current_block
        )),
    );
    Ok(HandshakeReport { remote, mismatches })
}

/// Read the first message and require it to be a well-formed status.
pub async fn read_status(
    conn: &dyn MsgReadWriter,
    max_size: u32,
) -> Result<StatusData, HandshakeError> {
    let msg = match conn.read_msg().await {
        Ok(msg) => msg,
        // Remote hung up instead of answering: same signal as an empty frame.
        Err(e) if e.is_eof() => return Err(DecodeError::NonConformantPeer { code: None }.into()),
        Err(e) => return Err(e.into()),
    };
    if msg.is_empty() {
        let code = msg.code;
        msg.discard();
        return Err(DecodeError::NonConformantPeer { code: Some(code) }.into());
    }
    if msg.code != codes::STATUS {
        let got = msg.code;
        msg.discard();
        return Err(DecodeError::UnexpectedCode {
            got,
            want: codes::STATUS,
        }
        .into());
    }
    if msg.size > max_size {
        let size = msg.size;
        msg.discard();
        return Err(DecodeError::TooLarge {
            size,
            max: max_size,
        }
        .into());
    }
    let status = decode_exact::<StatusData>(msg.code, &msg.payload)?;
    msg.discard();
    Ok(status)
}

/// Every disagreement between two statuses, in check order.
pub fn validate_status(local: &StatusData, remote: &StatusData) -> Vec<DecodeError> {
    let mut out = Vec::new();
    if local.protocol_version != remote.protocol_version {
        out.push(DecodeError::ProtocolVersionMismatch {
            local: local.protocol_version,
            remote: remote.protocol_version,
        });
    }
    if local.network_id != remote.network_id {
        out.push(DecodeError::NetworkIdMismatch {
            local: local.network_id,
            remote: remote.network_id,
        });
    }
    if local.genesis_block != remote.genesis_block {
        out.push(DecodeError::GenesisMismatch {
            local: local.genesis_block,
            remote: remote.genesis_block,
        });
    }
    out
}
