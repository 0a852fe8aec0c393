use alloy_primitives::{Address, Bloom, Bytes, B256, B64, U256};
use devp2ping::constants::ETH_MAX_MESSAGE_SIZE;
use devp2ping::network::memory::pipe;
use devp2ping::network::peer_ref::{NodeId, PeerRef};
use devp2ping::network::transport::{MsgReadWriter, TransportError, WireMessage};
use devp2ping::protocol::codec::{decode_message, describe, Decoded, MessageReader};
use devp2ping::protocol::error::{DecodeError, ReadError};
use devp2ping::protocol::messages::{
    codes, rlp_bytes, Block, BlockHashNumber, BlockHeader, GetBlockHeaders, HashOrNumber,
    NewBlock, StatusData, Transaction,
};

fn peer(n: u8) -> PeerRef {
    PeerRef::new(NodeId::repeat_byte(n), "127.0.0.1".parse().unwrap(), 30303, 30303)
}

fn header(number: u64) -> BlockHeader {
    BlockHeader {
        parent_hash: B256::repeat_byte(1),
        uncle_hash: B256::repeat_byte(2),
        coinbase: Address::repeat_byte(3),
        state_root: B256::repeat_byte(4),
        transactions_root: B256::repeat_byte(5),
        receipts_root: B256::repeat_byte(6),
        logs_bloom: Bloom::default(),
        difficulty: U256::from(131_072u64),
        number,
        gas_limit: 8_000_000,
        gas_used: 21_000,
        timestamp: 1_500_000_000,
        extra_data: Bytes::from_static(b"devp2ping"),
        mix_digest: B256::ZERO,
        nonce: B64::repeat_byte(9),
    }
}

fn tx(v: u64) -> Transaction {
    Transaction {
        nonce: 7,
        gas_price: U256::from(20_000_000_000u64),
        gas_limit: 21_000,
        to: Bytes::copy_from_slice(Address::repeat_byte(0xaa).as_slice()),
        value: U256::from(1_000u64),
        input: Bytes::new(),
        v: U256::from(v),
        r: U256::from(1u64),
        s: U256::from(2u64),
    }
}

#[test]
fn decodes_known_codes() {
    let status = StatusData::mainnet_genesis();
    let msg = WireMessage::new(codes::STATUS, rlp_bytes(&status));
    assert_eq!(
        decode_message(&msg, ETH_MAX_MESSAGE_SIZE).unwrap(),
        Decoded::Status(status)
    );

    let headers = vec![header(1), header(2)];
    let msg = WireMessage::new(codes::BLOCK_HEADERS, rlp_bytes(&headers));
    match decode_message(&msg, ETH_MAX_MESSAGE_SIZE).unwrap() {
        Decoded::BlockHeaders(got) => assert_eq!(got, headers),
        other => panic!("unexpected {:?}", other),
    }

    let announces = vec![BlockHashNumber {
        hash: header(5).hash(),
        number: 5,
    }];
    let msg = WireMessage::new(codes::NEW_BLOCK_HASHES, rlp_bytes(&announces));
    assert_eq!(
        decode_message(&msg, ETH_MAX_MESSAGE_SIZE).unwrap(),
        Decoded::NewBlockHashes(announces)
    );

    let query = GetBlockHeaders {
        origin: HashOrNumber::Hash(B256::repeat_byte(0x11)),
        amount: 192,
        skip: 0,
        reverse: false,
    };
    let msg = WireMessage::new(codes::GET_BLOCK_HEADERS, rlp_bytes(&query));
    assert_eq!(
        decode_message(&msg, ETH_MAX_MESSAGE_SIZE).unwrap(),
        Decoded::GetBlockHeaders(query)
    );
}

#[test]
fn header_query_by_number() {
    let query = GetBlockHeaders {
        origin: HashOrNumber::Number(4_370_000),
        amount: 1,
        skip: 0,
        reverse: true,
    };
    let msg = WireMessage::new(codes::GET_BLOCK_HEADERS, rlp_bytes(&query));
    match decode_message(&msg, ETH_MAX_MESSAGE_SIZE).unwrap() {
        Decoded::GetBlockHeaders(q) => assert_eq!(q.origin, HashOrNumber::Number(4_370_000)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn new_block_and_transactions_expose_details() {
    let block = NewBlock {
        block: Block {
            header: header(42),
            transactions: vec![tx(37), tx(27)],
            uncles: vec![],
        },
        total_difficulty: U256::from(1_000_000u64),
    };
    let msg = WireMessage::new(codes::NEW_BLOCK, rlp_bytes(&block));
    let decoded = decode_message(&msg, ETH_MAX_MESSAGE_SIZE).unwrap();
    assert_eq!(decoded.kind(), "new_block");
    assert!(describe(&decoded).contains("number=42"));
    assert!(describe(&decoded).contains("txs=2"));

    let txs = vec![tx(37), tx(28)];
    assert_eq!(txs[0].chain_id(), Some(1));
    assert_eq!(txs[1].chain_id(), None);
    assert_eq!(txs[0].recipient(), Some(Address::repeat_byte(0xaa)));
    let msg = WireMessage::new(codes::TRANSACTIONS, rlp_bytes(&txs));
    match decode_message(&msg, ETH_MAX_MESSAGE_SIZE).unwrap() {
        Decoded::Transactions(got) => {
            assert_eq!(got.len(), 2);
            assert_eq!(got[0].hash(), txs[0].hash());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn classification_errors() {
    let empty = WireMessage::empty(codes::BLOCK_HEADERS);
    let err = decode_message(&empty, ETH_MAX_MESSAGE_SIZE).unwrap_err();
    assert_eq!(
        err,
        DecodeError::NonConformantPeer {
            code: Some(codes::BLOCK_HEADERS)
        }
    );
    assert!(err.is_recoverable());

    let big = WireMessage::new(codes::TRANSACTIONS, vec![0xc0; 64]);
    assert_eq!(
        decode_message(&big, 16).unwrap_err(),
        DecodeError::TooLarge { size: 64, max: 16 }
    );

    let junk = WireMessage::new(codes::STATUS, vec![0xff, 0x00]);
    assert!(matches!(
        decode_message(&junk, ETH_MAX_MESSAGE_SIZE),
        Err(DecodeError::MalformedBody { code: 0, .. })
    ));

    let mut trailing = rlp_bytes(&StatusData::mainnet_genesis());
    trailing.push(0x01);
    let msg = WireMessage::new(codes::STATUS, trailing);
    assert!(matches!(
        decode_message(&msg, ETH_MAX_MESSAGE_SIZE),
        Err(DecodeError::MalformedBody { .. })
    ));

    let unknown = WireMessage::new(0x0d, vec![0xc0]);
    assert_eq!(
        decode_message(&unknown, ETH_MAX_MESSAGE_SIZE).unwrap(),
        Decoded::Unknown { code: 0x0d, size: 1 }
    );
}

#[test]
fn unqueried_codes_are_named_in_summaries() {
    let bodies = WireMessage::new(codes::BLOCK_BODIES, vec![0xc0]);
    let decoded = decode_message(&bodies, ETH_MAX_MESSAGE_SIZE).unwrap();
    assert!(describe(&decoded).starts_with("block_bodies code=0x06"));
    assert_eq!(codes::name(codes::GET_BLOCK_BODIES), "get_block_bodies");
    assert_eq!(codes::name(0x0d), "unknown");
}

#[tokio::test]
async fn reader_skips_empty_frame_and_continues() {
    let (ours, theirs) = pipe(peer(1), peer(2));
    theirs.send_raw(WireMessage::empty(codes::BLOCK_HEADERS)).unwrap();
    theirs
        .send_msg(codes::BLOCK_HEADERS, rlp_bytes(&vec![header(3)]))
        .await
        .unwrap();

    let mut reader = MessageReader::after_handshake(&ours, ETH_MAX_MESSAGE_SIZE);
    match reader.next().await {
        Err(ReadError::Decode(DecodeError::NonConformantPeer { code })) => {
            assert_eq!(code, Some(codes::BLOCK_HEADERS))
        }
        other => panic!("expected NonConformantPeer, got {:?}", other),
    }
    match reader.next().await {
        Ok(Decoded::BlockHeaders(h)) => assert_eq!(h[0].number, 3),
        other => panic!("expected headers, got {:?}", other),
    }
}

#[tokio::test]
async fn reader_discards_unknown_and_continues() {
    let (ours, theirs) = pipe(peer(1), peer(2));
    theirs.send_msg(0x0f, vec![0xc1, 0x80]).await.unwrap();
    theirs
        .send_msg(codes::NEW_BLOCK_HASHES, rlp_bytes(&Vec::<BlockHashNumber>::new()))
        .await
        .unwrap();

    let mut reader = MessageReader::after_handshake(&ours, ETH_MAX_MESSAGE_SIZE);
    assert!(matches!(
        reader.next().await,
        Ok(Decoded::Unknown { code: 0x0f, size: 2 })
    ));
    assert!(matches!(
        reader.next().await,
        Ok(Decoded::NewBlockHashes(v)) if v.is_empty()
    ));
}

#[tokio::test]
async fn reader_requires_status_first() {
    let (ours, theirs) = pipe(peer(1), peer(2));
    theirs
        .send_msg(codes::TRANSACTIONS, rlp_bytes(&vec![tx(37)]))
        .await
        .unwrap();
    theirs
        .send_msg(codes::STATUS, rlp_bytes(&StatusData::mainnet_genesis()))
        .await
        .unwrap();
    theirs
        .send_msg(codes::TRANSACTIONS, rlp_bytes(&vec![tx(37)]))
        .await
        .unwrap();

    let mut reader = MessageReader::new(&ours, ETH_MAX_MESSAGE_SIZE);
    assert!(!reader.status_seen());
    assert!(matches!(
        reader.next().await,
        Err(ReadError::Decode(DecodeError::NoStatusYet {
            code: codes::TRANSACTIONS
        }))
    ));
    assert!(matches!(reader.next().await, Ok(Decoded::Status(_))));
    assert!(reader.status_seen());
    assert!(matches!(reader.next().await, Ok(Decoded::Transactions(_))));
}

#[tokio::test]
async fn reader_rejects_oversized_then_continues() {
    let (ours, theirs) = pipe(peer(1), peer(2));
    theirs.send_msg(codes::TRANSACTIONS, vec![0xc0; 128]).await.unwrap();
    theirs.send_msg(codes::TRANSACTIONS, vec![0xc0]).await.unwrap();

    let mut reader = MessageReader::after_handshake(&ours, 64);
    assert!(matches!(
        reader.next().await,
        Err(ReadError::Decode(DecodeError::TooLarge { size: 128, max: 64 }))
    ));
    assert!(matches!(
        reader.next().await,
        Ok(Decoded::Transactions(v)) if v.is_empty()
    ));
}

#[tokio::test]
async fn reader_surfaces_eof() {
    let (ours, theirs) = pipe(peer(1), peer(2));
    drop(theirs);
    let mut reader = MessageReader::after_handshake(&ours, ETH_MAX_MESSAGE_SIZE);
    match reader.next().await {
        Err(ReadError::Transport(e)) => {
            assert!(e.is_eof());
            assert!(matches!(e, TransportError::Eof));
        }
        other => panic!("expected EOF, got {:?}", other),
    }
}
