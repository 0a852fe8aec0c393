// src/protocol/error.rs

use crate::network::transport::TransportError;
use alloy_primitives::B256;
use std::time::Duration;
use thiserror::Error;

/// Why an application message could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message too large: {size} > {max}")]
    TooLarge { size: u32, max: u32 },
    #[error("malformed body in msg #{code:#04x} ({size} bytes): {reason}")]
    MalformedBody { code: u64, size: u32, reason: String },
    #[error("unexpected message code {got:#04x} (want {want:#04x})")]
    UnexpectedCode { got: u64, want: u64 },
    #[error("msg #{code:#04x} received before status")]
    NoStatusYet { code: u64 },
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    ProtocolVersionMismatch { local: u32, remote: u32 },
    #[error("network id mismatch: local {local}, remote {remote}")]
    NetworkIdMismatch { local: u64, remote: u64 },
    #[error("genesis mismatch: local {local}, remote {remote}")]
    GenesisMismatch { local: B256, remote: B256 },
    /// Empty or truncated frame. Some widely deployed clients send these
    /// instead of a proper disconnect; callers may discard and continue.
    #[error("non-conformant peer: empty or truncated frame (code {code:?})")]
    NonConformantPeer { code: Option<u64> },
}

impl DecodeError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::NonConformantPeer { .. })
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            DecodeError::ProtocolVersionMismatch { .. }
                | DecodeError::NetworkIdMismatch { .. }
                | DecodeError::GenesisMismatch { .. }
        )
    }
}

/// Failure while pulling the next message off a connection.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("status exchange timed out after {0:?}")]
    Timeout(Duration),
    #[error("status exchange transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("status exchange protocol failure: {0}")]
    Protocol(#[from] DecodeError),
}

impl HandshakeError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HandshakeError::Protocol(e) if e.is_recoverable())
    }
}

impl From<ReadError> for HandshakeError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Transport(t) => HandshakeError::Transport(t),
            ReadError::Decode(d) => HandshakeError::Protocol(d),
        }
    }
}
