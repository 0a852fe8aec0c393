use devp2ping::network::memory::{pipe, MemoryTransport};
use devp2ping::network::orchestrator::OrchestratorConfig;
use devp2ping::network::peer_event::{PeerEvent, SubscriptionError};
use devp2ping::network::peer_ref::{NodeId, PeerRef};
use devp2ping::network::transport::{MsgReadWriter, Transport};
use devp2ping::protocol::handshake::exchange_status;
use devp2ping::protocol::messages::StatusData;
use devp2ping::rpc::dispatch;
use devp2ping::rpc::service::{Lifecycle, NodeService, ServiceConfig, ServiceError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn peer(n: u8) -> PeerRef {
    PeerRef::new(NodeId::repeat_byte(n), "127.0.0.1".parse().unwrap(), 30303, 30303)
}

fn config() -> ServiceConfig {
    ServiceConfig {
        orchestrator: OrchestratorConfig {
            handshake: None,
            ..OrchestratorConfig::default()
        },
        add_peer_timeout: Duration::from_millis(500),
    }
}

/// Peers with an odd first id byte connect, the rest are dropped.
fn odd_peers_connect() -> MemoryTransport {
    MemoryTransport::new(peer(0)).with_dial_hook(|p, feed| {
        if p.id()[0] % 2 == 1 {
            feed.send(PeerEvent::added(p.clone()));
        } else {
            feed.send(PeerEvent::dropped(p.clone()));
        }
    })
}

#[tokio::test]
async fn start_is_idempotent() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    let service = NodeService::new(transport.clone(), config());
    let first = service.start().await.unwrap();
    let second = service.start().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.self_peer_ref, peer(0));
    assert_eq!(first.node_info.enode, peer(0).to_string());
    assert_eq!(first.node_info.protocols[0].version, 63);
    assert_eq!(service.lifecycle(), Lifecycle::Running);
    assert!(transport.is_running());
}

#[tokio::test]
async fn start_without_identity_is_not_started() {
    let transport = Arc::new(MemoryTransport::anonymous());
    let service = NodeService::new(transport.clone(), config());
    assert!(matches!(service.start().await, Err(ServiceError::NotStarted)));
    assert_eq!(service.lifecycle(), Lifecycle::Stopped);
    assert!(!transport.is_running());
}

#[tokio::test]
async fn start_failure_is_transport_error() {
    let transport = Arc::new(MemoryTransport::new(peer(0)).failing_start("port in use"));
    let service = NodeService::new(transport, config());
    let err = service.start().await.unwrap_err();
    assert_eq!(err.code(), "transport");
    assert_eq!(service.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test]
async fn stop_is_a_noop_when_stopped() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    let service = NodeService::new(transport.clone(), config());
    service.stop().await.unwrap();
    service.start().await.unwrap();
    service.stop().await.unwrap();
    service.stop().await.unwrap();
    assert_eq!(service.lifecycle(), Lifecycle::Stopped);
    assert!(!transport.is_running());
    // Restart after stop works.
    service.start().await.unwrap();
    assert!(transport.is_running());
}

#[tokio::test]
async fn add_peer_requires_running_node() {
    let service = NodeService::new(Arc::new(MemoryTransport::new(peer(0))), config());
    let err = service
        .add_peer(&peer(1).to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotRunning));
}

#[tokio::test]
async fn malformed_enode_is_rejected_before_anything_else() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    let service = NodeService::new(transport.clone(), config());
    // Parse errors win even on a stopped node.
    let err = service.add_peer("enode://nope", None).await.unwrap_err();
    assert_eq!(err.code(), "malformed_peer_ref");

    service.start().await.unwrap();
    let err = service.remove_peer("garbage").unwrap_err();
    assert!(matches!(err, ServiceError::MalformedPeerRef(_)));
    assert!(transport.removals().is_empty());
    assert!(transport.dials().is_empty());
}

#[tokio::test]
async fn add_peer_reports_positive_and_negative_outcomes() {
    let transport = Arc::new(odd_peers_connect());
    let service = NodeService::new(transport.clone(), config());
    service.start().await.unwrap();

    let ok = service.add_peer(&peer(1).to_string(), None).await.unwrap();
    assert!(ok.ok);
    assert_eq!(ok.enode, peer(1).to_string());
    assert!(ok.reason.is_none());

    let dropped = service.add_peer(&peer(2).to_string(), None).await.unwrap();
    assert!(!dropped.ok);
    assert_eq!(dropped.reason.as_deref(), Some("peer dropped"));

    let json = serde_json::to_value(&ok).unwrap();
    assert!(json.get("reason").is_none());
}

#[tokio::test(start_paused = true)]
async fn add_peer_times_out_with_explicit_timeout() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    let service = NodeService::new(transport, config());
    service.start().await.unwrap();
    let started = tokio::time::Instant::now();
    let resp = service
        .add_peer(&peer(3).to_string(), Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert!(!resp.ok);
    assert_eq!(resp.reason.as_deref(), Some("timed out"));
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn remove_peer_forwards_to_transport() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    let service = NodeService::new(transport.clone(), config());
    service.start().await.unwrap();
    service.remove_peer(&peer(5).to_string()).unwrap();
    assert_eq!(transport.removals(), vec![peer(5)]);
}

#[tokio::test]
async fn connected_peer_stays_until_removed() {
    let transport = Arc::new(odd_peers_connect());
    let service = NodeService::new(transport.clone(), config());
    service.start().await.unwrap();

    let resp = service.add_peer(&peer(1).to_string(), None).await.unwrap();
    assert!(resp.ok);
    assert!(transport.removals().is_empty());
    assert!(!service.orchestrator().is_busy());

    service.remove_peer(&peer(1).to_string()).unwrap();
    assert_eq!(transport.removals(), vec![peer(1)]);
}

#[tokio::test]
async fn handshaken_connection_is_held_until_removed() {
    let transport = MemoryTransport::new(peer(0)).with_dial_hook(|p, feed| {
        feed.send(PeerEvent::added(p.clone()));
    });
    let transport = Arc::new(transport);
    let (ours, theirs) = pipe(peer(0), peer(1));
    transport.attach_connection(Box::new(ours));

    let remote = tokio::spawn(async move {
        let result = exchange_status(&theirs, &StatusData::mainnet_genesis(), &Default::default()).await;
        (theirs, result)
    });

    let service = NodeService::new(
        transport.clone(),
        ServiceConfig {
            add_peer_timeout: Duration::from_secs(5),
            ..ServiceConfig::default()
        },
    );
    service.start().await.unwrap();
    let resp = service.add_peer(&peer(1).to_string(), None).await.unwrap();
    assert!(resp.ok, "{:?}", resp.reason);
    assert!(transport.removals().is_empty());

    let (theirs, result) = remote.await.unwrap();
    assert!(result.is_ok());

    service.remove_peer(&peer(1).to_string()).unwrap();
    // Our end is released once the removal is seen, so the remote reads EOF.
    let read = tokio::time::timeout(Duration::from_secs(5), theirs.read_msg())
        .await
        .expect("held connection was not released");
    assert!(read.unwrap_err().is_eof());
}

#[tokio::test]
async fn subscription_failure_is_a_structured_error() {
    let transport = MemoryTransport::new(peer(0)).with_dial_hook(|_, feed| {
        feed.fail_all(SubscriptionError::Transport("event loop died".into()));
    });
    let service = NodeService::new(Arc::new(transport), config());
    service.start().await.unwrap();

    let err = service
        .add_peer(&peer(1).to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Subscription(SubscriptionError::Transport(_))
    ));

    let line = json!({"id": 9, "method": "add_peer", "params": {"enode": peer(1).to_string()}});
    let resp = dispatch(&service, &line.to_string()).await;
    assert_eq!(resp.id, 9);
    let error = resp.error.unwrap();
    assert_eq!(error.code, "subscription");
    assert!(error.message.contains("event loop died"));
}

#[tokio::test(start_paused = true)]
async fn attempt_cut_short_by_stop_is_not_running() {
    let transport = Arc::new(MemoryTransport::new(peer(0)));
    let service = Arc::new(NodeService::new(transport.clone(), config()));
    service.start().await.unwrap();

    let adding = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .add_peer(&peer(1).to_string(), Some(Duration::from_secs(60)))
                .await
        })
    };
    while transport.dials().is_empty() {
        tokio::task::yield_now().await;
    }
    let stopping = {
        let service = service.clone();
        tokio::spawn(async move { service.stop().await })
    };
    while service.lifecycle() != Lifecycle::Stopping {
        tokio::task::yield_now().await;
    }
    // The transport's feed goes away underneath the in-flight attempt.
    transport.feed().close();

    let err = adding.await.unwrap().unwrap_err();
    assert!(matches!(err, ServiceError::NotRunning), "{:?}", err);
    stopping.await.unwrap().unwrap();
    assert_eq!(service.lifecycle(), Lifecycle::Stopped);
}
