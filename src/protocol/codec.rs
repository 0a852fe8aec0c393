// src/protocol/codec.rs

use crate::events::model::LogLevel;
use crate::network::events::emit_protocol_event;
use crate::network::transport::{MsgReadWriter, WireMessage};
use crate::protocol::error::{DecodeError, ReadError};
use crate::protocol::messages::{
    codes, BlockHashNumber, BlockHeader, GetBlockHeaders, NewBlock, StatusData, Transaction,
};
use alloy_rlp::Decodable;

/// A message decoded into one of the known payload shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Status(StatusData),
    GetBlockHeaders(GetBlockHeaders),
    BlockHeaders(Vec<BlockHeader>),
    NewBlockHashes(Vec<BlockHashNumber>),
    Transactions(Vec<Transaction>),
    NewBlock(Box<NewBlock>),
    /// Code outside the decoded set; the frame has been discarded.
    Unknown { code: u64, size: u32 },
}

impl Decoded {
    pub fn kind(&self) -> &'static str {
        match self {
            Decoded::Status(_) => "status",
            Decoded::GetBlockHeaders(_) => "get_block_headers",
            Decoded::BlockHeaders(_) => "block_headers",
            Decoded::NewBlockHashes(_) => "new_block_hashes",
            Decoded::Transactions(_) => "transactions",
            Decoded::NewBlock(_) => "new_block",
            Decoded::Unknown { .. } => "unknown",
        }
    }
}

/// Decode a whole payload as `T`; trailing bytes are a malformed body.
pub fn decode_exact<T: Decodable>(code: u64, payload: &[u8]) -> Result<T, DecodeError> {
    let malformed = |reason: String| DecodeError::MalformedBody {
        code,
        size: payload.len() as u32,
        reason,
    };
    let mut buf = payload;
    let value = T::decode(&mut buf).map_err(|e| malformed(e.to_string()))?;
    if !buf.is_empty() {
        return Err(malformed(format!("{} trailing bytes", buf.len())));
    }
    Ok(value)
}

/// Classify and decode one message by code.
///
/// Empty frames are `NonConformantPeer` whatever their code: no eth payload
/// encodes to zero bytes.
pub fn decode_message(msg: &WireMessage, max_size: u32) -> Result<Decoded, DecodeError> {
    if msg.is_empty() {
        return Err(DecodeError::NonConformantPeer {
            code: Some(msg.code),
        });
    }
    if msg.size > max_size {
        return Err(DecodeError::TooLarge {
            size: msg.size,
            max: max_size,
        });
    }
    let payload = msg.payload.as_slice();
    let decoded = match msg.code {
        codes::STATUS => Decoded::Status(decode_exact(msg.code, payload)?),
        codes::GET_BLOCK_HEADERS => Decoded::GetBlockHeaders(decode_exact(msg.code, payload)?),
        codes::BLOCK_HEADERS => Decoded::BlockHeaders(decode_exact(msg.code, payload)?),
        codes::NEW_BLOCK_HASHES => Decoded::NewBlockHashes(decode_exact(msg.code, payload)?),
        codes::TRANSACTIONS => Decoded::Transactions(decode_exact(msg.code, payload)?),
        codes::NEW_BLOCK => Decoded::NewBlock(Box::new(decode_exact(msg.code, payload)?)),
        code => Decoded::Unknown {
            code,
            size: msg.size,
        },
    };
    Ok(decoded)
}

/// One-line summary of a decoded message for logs.
pub fn describe(decoded: &Decoded) -> String {
    match decoded {
        Decoded::Status(s) => format!(
            "version={} network={} td={} head={} genesis={}",
            s.protocol_version, s.network_id, s.total_difficulty, s.current_block, s.genesis_block
        ),
        Decoded::GetBlockHeaders(q) => format!(
            "origin={:?} amount={} skip={} reverse={}",
            q.origin, q.amount, q.skip, q.reverse
        ),
        Decoded::BlockHeaders(headers) => match (headers.first(), headers.last()) {
            (Some(first), Some(last)) => format!(
                "count={} first=#{} last=#{}",
                headers.len(),
                first.number,
                last.number
            ),
            _ => "count=0".to_string(),
        },
        Decoded::NewBlockHashes(announces) => {
            let items: Vec<String> = announces
                .iter()
                .map(|a| format!("#{}={}", a.number, a.hash))
                .collect();
            format!("count={} [{}]", announces.len(), items.join(", "))
        }
        Decoded::Transactions(txs) => format!("count={}", txs.len()),
        Decoded::NewBlock(nb) => format!(
            "number={} hash={} txs={} uncles={} td={}",
            nb.block.header.number,
            nb.block.header.hash(),
            nb.block.transactions.len(),
            nb.block.uncles.len(),
            nb.total_difficulty
        ),
        Decoded::Unknown { code, size } => {
            format!("{} code={:#04x} size={}", codes::name(*code), code, size)
        }
    }
}

/// Emit protocol events for a decoded message. Transactions get one line each.
pub fn log_decoded(peer: &str, decoded: &Decoded) {
    let code = match decoded {
        Decoded::Status(_) => Some(codes::STATUS),
        Decoded::GetBlockHeaders(_) => Some(codes::GET_BLOCK_HEADERS),
        Decoded::BlockHeaders(_) => Some(codes::BLOCK_HEADERS),
        Decoded::NewBlockHashes(_) => Some(codes::NEW_BLOCK_HASHES),
        Decoded::Transactions(_) => Some(codes::TRANSACTIONS),
        Decoded::NewBlock(_) => Some(codes::NEW_BLOCK),
        Decoded::Unknown { code, .. } => Some(*code),
    };
    let level = match decoded {
        Decoded::Unknown { .. } => LogLevel::Debug,
        _ => LogLevel::Info,
    };
    emit_protocol_event(
        level,
        decoded.kind(),
        Some(peer.to_string()),
        code,
        Some(describe(decoded)),
    );
    if let Decoded::Transactions(txs) = decoded {
        for tx in txs {
            emit_protocol_event(
                LogLevel::Debug,
                "tx",
                Some(peer.to_string()),
                code,
                Some(format!(
                    "hash={} chain_id={:?} to={:?} value={} nonce={}",
                    tx.hash(),
                    tx.chain_id(),
                    tx.recipient(),
                    tx.value,
                    tx.nonce
                )),
            );
        }
    }
}

/// Pulls messages off a connection one at a time, decoding and logging each.
///
/// Every frame read is either decoded or discarded before `next` returns, so a
/// failed decode never leaves the connection stuck on the same message.
pub struct MessageReader<'a> {
    conn: &'a dyn MsgReadWriter,
    max_size: u32,
    status_seen: bool,
}

impl<'a> MessageReader<'a> {
    pub fn new(conn: &'a dyn MsgReadWriter, max_size: u32) -> Self {
        Self {
            conn,
            max_size,
            status_seen: false,
        }
    }

    /// Reader for a connection whose status exchange already happened.
    pub fn after_handshake(conn: &'a dyn MsgReadWriter, max_size: u32) -> Self {
        Self {
            conn,
            max_size,
            status_seen: true,
        }
    }

    pub fn status_seen(&self) -> bool {
        self.status_seen
    }

    pub async fn next(&mut self) -> Result<Decoded, ReadError> {
        let msg = self.conn.read_msg().await?;
        let peer = self.conn.peer().short_id();
        let code = msg.code;
        let size = msg.size;

        if !self.status_seen && code != codes::STATUS && !msg.is_empty() {
            msg.discard();
            emit_protocol_event(
                LogLevel::Warn,
                "no_status_yet",
                Some(peer),
                Some(code),
                Some(format!("{} size={}", codes::name(code), size)),
            );
            return Err(DecodeError::NoStatusYet { code }.into());
        }

        let result = decode_message(&msg, self.max_size);
        msg.discard();
        match result {
            Ok(decoded) => {
                match &decoded {
                    Decoded::Status(_) if self.status_seen => {
                        emit_protocol_event(
                            LogLevel::Warn,
                            "extra_status",
                            Some(peer.clone()),
                            Some(code),
                            None,
                        );
                    }
                    Decoded::Status(_) => self.status_seen = true,
                    Decoded::Unknown { .. } => {
                        emit_protocol_event(
                            LogLevel::Info,
                            "unqueried_discarded",
                            Some(peer.clone()),
                            Some(code),
                            Some(format!("{} size={}", codes::name(code), size)),
                        );
                    }
                    _ => {}
                }
                log_decoded(&peer, &decoded);
                Ok(decoded)
            }
            Err(e) => {
                let (level, kind) = if e.is_recoverable() {
                    (LogLevel::Warn, "non_conformant_frame")
                } else {
                    (LogLevel::Error, "decode_failed")
                };
                emit_protocol_event(
                    level,
                    kind,
                    Some(peer),
                    Some(code),
                    Some(format!("size={} error={}", size, e)),
                );
                Err(e.into())
            }
        }
    }
}
