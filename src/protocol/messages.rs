// src/protocol/messages.rs
//
// Payload shapes of the eth/63 messages this tool understands. All of them
// are RLP lists on the wire.

use crate::constants::{
    ETH_PROTOCOL_VERSION, MAINNET_GENESIS_DIFFICULTY, MAINNET_GENESIS_HASH, MAINNET_NETWORK_ID,
};
use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};

/// Message codes, relative to the eth sub-protocol offset.
pub mod codes {
    pub const STATUS: u64 = 0x00;
    pub const NEW_BLOCK_HASHES: u64 = 0x01;
    pub const TRANSACTIONS: u64 = 0x02;
    pub const GET_BLOCK_HEADERS: u64 = 0x03;
    pub const BLOCK_HEADERS: u64 = 0x04;
    pub const GET_BLOCK_BODIES: u64 = 0x05;
    pub const BLOCK_BODIES: u64 = 0x06;
    pub const NEW_BLOCK: u64 = 0x07;

    pub fn name(code: u64) -> &'static str {
        match code {
            STATUS => "status",
            NEW_BLOCK_HASHES => "new_block_hashes",
            TRANSACTIONS => "transactions",
            GET_BLOCK_HEADERS => "get_block_headers",
            BLOCK_HEADERS => "block_headers",
            GET_BLOCK_BODIES => "get_block_bodies",
            BLOCK_BODIES => "block_bodies",
            NEW_BLOCK => "new_block",
            _ => "unknown",
        }
    }
}

/// RLP encoding of any payload value.
pub fn rlp_bytes<T: Encodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.length());
    value.encode(&mut out);
    out
}

/// First message on every eth connection, sent by both sides.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct StatusData {
    pub protocol_version: u32,
    pub network_id: u64,
    pub total_difficulty: U256,
    pub current_block: B256,
    pub genesis_block: B256,
}

impl StatusData {
    /// Status of a node sitting on the mainnet genesis block.
    pub fn mainnet_genesis() -> Self {
        Self {
            protocol_version: ETH_PROTOCOL_VERSION,
            network_id: MAINNET_NETWORK_ID,
            total_difficulty: U256::from(MAINNET_GENESIS_DIFFICULTY),
            current_block: MAINNET_GENESIS_HASH,
            genesis_block: MAINNET_GENESIS_HASH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub uncle_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_digest: B256,
    pub nonce: B64,
}

impl BlockHeader {
    pub fn hash(&self) -> B256 {
        keccak256(rlp_bytes(self))
    }
}

/// Pre-typed ("legacy") transaction. `to` is empty for contract creation.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Bytes,
    pub value: U256,
    pub input: Bytes,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

impl Transaction {
    pub fn hash(&self) -> B256 {
        keccak256(rlp_bytes(self))
    }

    pub fn recipient(&self) -> Option<Address> {
        (self.to.len() == 20).then(|| Address::from_slice(&self.to))
    }

    /// EIP-155 chain id recovered from `v`; `None` for pre-155 signatures.
    pub fn chain_id(&self) -> Option<u64> {
        let v = u64::try_from(self.v).ok()?;
        (v >= 35).then(|| (v - 35) / 2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<BlockHeader>,
}

/// Block propagation message.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct NewBlock {
    pub block: Block,
    pub total_difficulty: U256,
}

/// One entry of a block announcement.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockHashNumber {
    pub hash: B256,
    pub number: u64,
}

/// Start of a header query: a block hash or a block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(B256),
    Number(u64),
}

impl Encodable for HashOrNumber {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            HashOrNumber::Hash(h) => h.encode(out),
            HashOrNumber::Number(n) => n.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            HashOrNumber::Hash(h) => h.length(),
            HashOrNumber::Number(n) => n.length(),
        }
    }
}

impl Decodable for HashOrNumber {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        // A 32-byte string header is 0x80 + 32.
        match buf.first() {
            Some(0xa0) => B256::decode(buf).map(HashOrNumber::Hash),
            _ => u64::decode(buf).map(HashOrNumber::Number),
        }
    }
}

/// Block header query.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetBlockHeaders {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}
