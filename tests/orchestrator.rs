use devp2ping::network::memory::{pipe, MemoryTransport};
use devp2ping::network::orchestrator::{
    AttemptState, OrchestratorConfig, OrchestratorError, PeerOrchestrator,
};
use devp2ping::network::peer_event::PeerEvent;
use devp2ping::network::peer_ref::{NodeId, PeerRef};
use devp2ping::network::transport::{MsgReadWriter, Transport, TransportError, WireMessage};
use devp2ping::network::watcher::{ConnectionOutcome, FailureReason};
use devp2ping::protocol::error::{DecodeError, HandshakeError};
use devp2ping::protocol::handshake::exchange_status;
use devp2ping::protocol::messages::{codes, rlp_bytes, StatusData, Transaction};
use std::sync::Arc;
use std::time::Duration;

fn peer(n: u8) -> PeerRef {
    PeerRef::new(NodeId::repeat_byte(n), "127.0.0.1".parse().unwrap(), 30303, 30303)
}

fn no_handshake() -> OrchestratorConfig {
    OrchestratorConfig {
        handshake: None,
        ..OrchestratorConfig::default()
    }
}

/// Transport whose "network" announces every dial as connected after `delay`.
async fn connecting_transport(delay: Duration) -> Arc<MemoryTransport> {
    let transport = MemoryTransport::new(peer(0)).with_dial_hook(move |p, feed| {
        let feed = feed.clone();
        let p = p.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            feed.send(PeerEvent::added(p));
        });
    });
    let transport = Arc::new(transport);
    transport.start().await.unwrap();
    transport
}

#[tokio::test(start_paused = true)]
async fn connect_without_handshake() {
    let transport = connecting_transport(Duration::from_millis(50)).await;
    let orch = PeerOrchestrator::new(transport.clone(), no_handshake());
    let handle = orch.start_attempt(peer(1), Duration::from_secs(1)).unwrap();
    let state = handle.state_watch();
    let report = handle.finished().await.unwrap();

    assert!(report.outcome.is_connected());
    assert!(report.remote_status.is_none());
    assert_eq!(transport.dials(), vec![peer(1)]);
    assert_eq!(transport.removals(), vec![peer(1)]);
    assert_eq!(*state.borrow(), AttemptState::Idle);
    assert!(!orch.is_busy());
}

#[tokio::test(start_paused = true)]
async fn second_attempt_is_busy() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    transport.start().await.unwrap();
    let orch = PeerOrchestrator::new(transport.clone(), no_handshake());

    let first = orch.start_attempt(peer(1), Duration::from_secs(10)).unwrap();
    assert!(orch.is_busy());
    assert_eq!(
        orch.start_attempt(peer(2), Duration::from_secs(10)).err(),
        Some(OrchestratorError::Busy)
    );

    first.cancel();
    assert_eq!(first.finished().await.err(), Some(OrchestratorError::Cancelled));
    assert!(!orch.is_busy());
    // Rejected attempt never dialed.
    assert_eq!(transport.dials(), vec![peer(1)]);
}

#[tokio::test(start_paused = true)]
async fn sequential_attempts_are_allowed() {
    let transport = connecting_transport(Duration::from_millis(10)).await;
    let orch = PeerOrchestrator::new(transport.clone(), no_handshake());
    for n in 1..=3 {
        let handle = orch.start_attempt(peer(n), Duration::from_secs(1)).unwrap();
        assert!(handle.finished().await.unwrap().outcome.is_connected());
    }
    assert_eq!(transport.dials().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn silent_network_times_out_and_disconnects() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    transport.start().await.unwrap();
    let orch = PeerOrchestrator::new(transport.clone(), no_handshake());
    let report = orch.attempt(peer(1), Duration::from_millis(500)).await.unwrap();
    assert!(matches!(
        report.outcome,
        ConnectionOutcome::Failed(FailureReason::TimedOut)
    ));
    orch.quiesce().await;
    assert_eq!(transport.removals(), vec![peer(1)]);
}

#[tokio::test(start_paused = true)]
async fn drop_is_reported_as_dropped() {
    let transport = MemoryTransport::new(peer(0)).with_dial_hook(|p, feed| {
        feed.send(PeerEvent::dropped(p.clone()));
    });
    let transport = Arc::new(transport);
    transport.start().await.unwrap();
    let orch = PeerOrchestrator::new(transport, no_handshake());
    let report = orch.attempt(peer(1), Duration::from_secs(5)).await.unwrap();
    assert!(matches!(
        report.outcome,
        ConnectionOutcome::Failed(FailureReason::Dropped)
    ));
}

#[tokio::test(start_paused = true)]
async fn stopped_transport_fails_with_subscription_error() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    transport.start().await.unwrap();
    transport.stop().await;
    let orch = PeerOrchestrator::new(transport, no_handshake());
    let report = orch.attempt(peer(1), Duration::from_secs(5)).await.unwrap();
    assert!(matches!(
        report.outcome,
        ConnectionOutcome::Failed(FailureReason::SubscriptionError(_))
    ));
}

#[tokio::test]
async fn handshake_success_carries_remote_status() {
    let transport = connecting_transport(Duration::from_millis(5)).await;
    let (ours, theirs) = pipe(peer(0), peer(1));
    transport.attach_connection(Box::new(ours));

    let remote = tokio::spawn(async move {
        let status = StatusData::mainnet_genesis();
        exchange_status(&theirs, &status, &Default::default()).await
    });

    let orch = PeerOrchestrator::new(transport.clone(), OrchestratorConfig::default());
    let report = orch
        .start_attempt(peer(1), Duration::from_secs(5))
        .unwrap()
        .finished()
        .await
        .unwrap();
    assert!(report.outcome.is_connected());
    assert_eq!(report.remote_status, Some(StatusData::mainnet_genesis()));
    assert!(report.mismatches.is_empty());
    assert!(remote.await.unwrap().is_ok());
}

#[tokio::test]
async fn handshake_failure_is_not_connected() {
    let transport = connecting_transport(Duration::from_millis(5)).await;
    let (ours, theirs) = pipe(peer(0), peer(1));
    theirs.send_raw(WireMessage::empty(codes::STATUS)).unwrap();
    transport.attach_connection(Box::new(ours));

    let orch = PeerOrchestrator::new(transport.clone(), OrchestratorConfig::default());
    let report = orch.attempt(peer(1), Duration::from_secs(5)).await.unwrap();
    match report.outcome {
        ConnectionOutcome::Failed(FailureReason::HandshakeFailed(HandshakeError::Protocol(
            DecodeError::NonConformantPeer { .. },
        ))) => {}
        other => panic!("expected handshake failure, got {:?}", other),
    }
    drop(theirs);
}

#[tokio::test]
async fn handshake_without_connection_fails() {
    let transport = connecting_transport(Duration::from_millis(5)).await;
    let orch = PeerOrchestrator::new(transport, OrchestratorConfig::default());
    let report = orch.attempt(peer(1), Duration::from_secs(5)).await.unwrap();
    assert!(matches!(
        report.outcome,
        ConnectionOutcome::Failed(FailureReason::HandshakeFailed(HandshakeError::Transport(
            TransportError::Disconnected
        )))
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_handshake_produces_no_report() {
    let transport = connecting_transport(Duration::from_millis(5)).await;
    // Remote end stays open but never answers.
    let (ours, _theirs) = pipe(peer(0), peer(1));
    transport.attach_connection(Box::new(ours));

    let orch = PeerOrchestrator::new(transport.clone(), OrchestratorConfig::default());
    let handle = orch.start_attempt(peer(1), Duration::from_secs(5)).unwrap();
    let mut state = handle.state_watch();
    state
        .wait_for(|s| *s == AttemptState::Handshaking)
        .await
        .unwrap();
    handle.cancel();
    assert_eq!(handle.finished().await.err(), Some(OrchestratorError::Cancelled));
    assert_eq!(transport.removals(), vec![peer(1)]);
}

#[tokio::test(start_paused = true)]
async fn observe_reads_until_remote_hangs_up() {
    let transport = connecting_transport(Duration::from_millis(5)).await;
    let (ours, theirs) = pipe(peer(0), peer(1));
    transport.attach_connection(Box::new(ours));

    let config = OrchestratorConfig {
        handshake: None,
        observe: Duration::from_secs(30),
        ..OrchestratorConfig::default()
    };
    let orch = PeerOrchestrator::new(transport.clone(), config);
    let handle = orch.start_attempt(peer(1), Duration::from_secs(5)).unwrap();
    let mut state = handle.state_watch();

    theirs
        .send_msg(codes::STATUS, rlp_bytes(&StatusData::mainnet_genesis()))
        .await
        .unwrap();
    theirs.send_raw(WireMessage::empty(codes::TRANSACTIONS)).unwrap();
    theirs
        .send_msg(codes::TRANSACTIONS, rlp_bytes(&Vec::<Transaction>::new()))
        .await
        .unwrap();

    state
        .wait_for(|s| *s == AttemptState::Observing)
        .await
        .unwrap();
    drop(theirs);

    let report = handle.finished().await.unwrap();
    assert!(report.outcome.is_connected());
    assert_eq!(*state.borrow(), AttemptState::Idle);
}
