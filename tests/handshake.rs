use alloy_primitives::{B256, U256};
use devp2ping::network::memory::pipe;
use devp2ping::network::peer_ref::{NodeId, PeerRef};
use devp2ping::network::transport::{MsgReadWriter, WireMessage};
use devp2ping::protocol::error::{DecodeError, HandshakeError};
use devp2ping::protocol::handshake::{
    exchange_status, validate_status, HandshakeConfig, ValidationPolicy,
};
use devp2ping::protocol::messages::{codes, rlp_bytes, StatusData};
use std::time::Duration;

fn peer(n: u8) -> PeerRef {
    PeerRef::new(NodeId::repeat_byte(n), "127.0.0.1".parse().unwrap(), 30303, 30303)
}

fn cfg(policy: ValidationPolicy) -> HandshakeConfig {
    HandshakeConfig {
        policy,
        ..HandshakeConfig::default()
    }
}

fn other_network() -> StatusData {
    StatusData {
        network_id: 3,
        genesis_block: B256::repeat_byte(0x41),
        ..StatusData::mainnet_genesis()
    }
}

#[tokio::test]
async fn both_sides_learn_each_other() {
    let (a, b) = pipe(peer(1), peer(2));
    let mut b_status = StatusData::mainnet_genesis();
    b_status.total_difficulty = U256::from(99u64);
    let a_status = StatusData::mainnet_genesis();
    let c = cfg(ValidationPolicy::Strict);

    let (ra, rb) = tokio::join!(
        exchange_status(&a, &a_status, &c),
        exchange_status(&b, &b_status, &c)
    );
    let ra = ra.unwrap();
    let rb = rb.unwrap();
    assert_eq!(ra.remote, b_status);
    assert_eq!(rb.remote, a_status);
    assert!(ra.is_compatible());
}

#[tokio::test]
async fn strict_rejects_first_mismatch() {
    let (a, b) = pipe(peer(1), peer(2));
    let remote = other_network();
    let c = cfg(ValidationPolicy::Strict);
    let local = StatusData::mainnet_genesis();
    let off = cfg(ValidationPolicy::Off);
    let (ra, _) = tokio::join!(
        exchange_status(&a, &local, &c),
        exchange_status(&b, &remote, &off)
    );
    match ra {
        Err(HandshakeError::Protocol(DecodeError::NetworkIdMismatch { local, remote })) => {
            assert_eq!((local, remote), (1, 3))
        }
        other => panic!("expected network mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn annotate_reports_all_mismatches() {
    let (a, b) = pipe(peer(1), peer(2));
    let mut remote = other_network();
    remote.protocol_version = 62;
    let local = StatusData::mainnet_genesis();
    let annotate = cfg(ValidationPolicy::Annotate);
    let off = cfg(ValidationPolicy::Off);
    let (ra, _) = tokio::join!(
        exchange_status(&a, &local, &annotate),
        exchange_status(&b, &remote, &off)
    );
    let report = ra.unwrap();
    assert!(!report.is_compatible());
    assert_eq!(report.mismatches.len(), 3);
    assert!(report.mismatches.iter().all(|m| m.is_mismatch()));
    assert!(matches!(
        report.mismatches[0],
        DecodeError::ProtocolVersionMismatch { local: 63, remote: 62 }
    ));
}

#[tokio::test]
async fn off_accepts_anything_well_formed() {
    let (a, b) = pipe(peer(1), peer(2));
    let local = StatusData::mainnet_genesis();
    let remote = other_network();
    let off = cfg(ValidationPolicy::Off);
    let (ra, _) = tokio::join!(
        exchange_status(&a, &local, &off),
        exchange_status(&b, &remote, &off)
    );
    let report = ra.unwrap();
    assert!(report.is_compatible());
    assert_eq!(report.remote.network_id, 3);
}

#[test]
fn validate_lists_disagreements_in_order() {
    let local = StatusData::mainnet_genesis();
    assert!(validate_status(&local, &local).is_empty());
    let found = validate_status(&local, &other_network());
    assert!(matches!(found[0], DecodeError::NetworkIdMismatch { .. }));
    assert!(matches!(found[1], DecodeError::GenesisMismatch { .. }));
}

#[tokio::test(start_paused = true)]
async fn silent_peer_times_out() {
    let (a, _b) = pipe(peer(1), peer(2));
    let c = HandshakeConfig {
        timeout: Duration::from_secs(2),
        ..HandshakeConfig::default()
    };
    let err = exchange_status(&a, &StatusData::mainnet_genesis(), &c)
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Timeout(d) if d == Duration::from_secs(2)));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn empty_status_frame_is_non_conformant() {
    let (a, b) = pipe(peer(1), peer(2));
    b.send_raw(WireMessage::empty(codes::STATUS)).unwrap();
    let err = exchange_status(&a, &StatusData::mainnet_genesis(), &HandshakeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::Protocol(DecodeError::NonConformantPeer { code: Some(0) })
    ));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn hangup_is_non_conformant() {
    let (a, b) = pipe(peer(1), peer(2));
    drop(b);
    let err = exchange_status(&a, &StatusData::mainnet_genesis(), &HandshakeConfig::default())
        .await
        .unwrap_err();
    // Sending fails too, whichever leg loses the race the exchange fails.
    assert!(matches!(
        err,
        HandshakeError::Protocol(DecodeError::NonConformantPeer { code: None })
            | HandshakeError::Transport(_)
    ));
}

#[tokio::test]
async fn wrong_first_message_is_rejected() {
    let (a, b) = pipe(peer(1), peer(2));
    b.send_msg(codes::TRANSACTIONS, vec![0xc0]).await.unwrap();
    let err = exchange_status(&a, &StatusData::mainnet_genesis(), &HandshakeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::Protocol(DecodeError::UnexpectedCode { got: 2, want: 0 })
    ));
}

#[tokio::test]
async fn oversized_status_is_rejected() {
    let (a, b) = pipe(peer(1), peer(2));
    b.send_msg(codes::STATUS, rlp_bytes(&StatusData::mainnet_genesis()))
        .await
        .unwrap();
    let c = HandshakeConfig {
        max_message_size: 8,
        ..HandshakeConfig::default()
    };
    let err = exchange_status(&a, &StatusData::mainnet_genesis(), &c)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HandshakeError::Protocol(DecodeError::TooLarge { max: 8, .. })
    ));
}

#[test]
fn policy_parses_from_text() {
    assert_eq!("STRICT".parse::<ValidationPolicy>(), Ok(ValidationPolicy::Strict));
    assert_eq!("none".parse::<ValidationPolicy>(), Ok(ValidationPolicy::Off));
    assert!("lenient".parse::<ValidationPolicy>().is_err());
    assert_eq!(ValidationPolicy::default(), ValidationPolicy::Annotate);
}
