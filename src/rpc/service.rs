// src/rpc/service.rs
//
// Start/stop the node and add/remove peers. The transport is shared; the only
// guard around it is the lifecycle state machine below.

use crate::constants::DEFAULT_RPC_ADD_PEER_TIMEOUT;
use crate::events::model::LogLevel;
use crate::network::orchestrator::{OrchestratorConfig, OrchestratorError, PeerOrchestrator};
use crate::network::peer_event::SubscriptionError;
use crate::network::peer_ref::{PeerRef, PeerRefError};
use crate::network::transport::{NodeInfo, Transport, TransportError};
use crate::network::watcher::{ConnectionOutcome, FailureReason};
use crate::rpc::types::codes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl From<u8> for Lifecycle {
    fn from(v: u8) -> Self {
        match v {
            STARTING => Lifecycle::Starting,
            RUNNING => Lifecycle::Running,
            STOPPING => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("node did not produce a self identity")]
    NotStarted,
    #[error("a start or stop is already in progress")]
    StartInProgress,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed peer reference: {0}")]
    MalformedPeerRef(#[from] PeerRefError),
    #[error("node is not running")]
    NotRunning,
    #[error("peer event subscription failed: {0}")]
    Subscription(SubscriptionError),
    #[error("another add_peer is in flight")]
    Busy,
    #[error("attempt cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Stable error code used on the RPC wire.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotStarted => codes::NOT_STARTED,
            ServiceError::StartInProgress => codes::START_IN_PROGRESS,
            ServiceError::Transport(_) => codes::TRANSPORT,
            ServiceError::MalformedPeerRef(_) => codes::MALFORMED_PEER_REF,
            ServiceError::NotRunning => codes::NOT_RUNNING,
            ServiceError::Subscription(_) => codes::SUBSCRIPTION,
            ServiceError::Busy => codes::BUSY,
            ServiceError::Cancelled => codes::CANCELLED,
        }
    }
}

impl From<OrchestratorError> for ServiceError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Busy => ServiceError::Busy,
            OrchestratorError::Cancelled => ServiceError::Cancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub orchestrator: OrchestratorConfig,
    /// Used when `add_peer` is called without a timeout.
    pub add_peer_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            add_peer_timeout: DEFAULT_RPC_ADD_PEER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub self_peer_ref: PeerRef,
    pub node_info: NodeInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddPeerResponse {
    pub ok: bool,
    pub enode: String,
    /// Why a negative outcome happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn log_service_event(level: LogLevel, action: &str, detail: Option<String>) {
    crate::emit_system_event!("service", level, action, detail);
}

pub struct NodeService {
    transport: Arc<dyn Transport>,
    orchestrator: PeerOrchestrator,
    add_peer_timeout: Duration,
    state: AtomicU8,
    started: Mutex<Option<StartResponse>>,
}

impl NodeService {
    /// Peers added through the service stay connected until `remove_peer`.
    pub fn new(transport: Arc<dyn Transport>, config: ServiceConfig) -> Self {
        let orchestrator = PeerOrchestrator::new(
            transport.clone(),
            OrchestratorConfig {
                disconnect_on_finish: false,
                ..config.orchestrator
            },
        );
        Self {
            transport,
            orchestrator,
            add_peer_timeout: config.add_peer_timeout,
            state: AtomicU8::new(STOPPED),
            started: Mutex::new(None),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.load(Ordering::SeqCst).into()
    }

    pub fn orchestrator(&self) -> &PeerOrchestrator {
        &self.orchestrator
    }

    /// Start the transport. Starting a running node returns its identity again.
    pub async fn start(&self) -> Result<StartResponse, ServiceError> {
        match self
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(RUNNING) => {
                if let Some(cached) = self.started.lock().clone() {
                    return Ok(cached);
                }
                return Err(ServiceError::StartInProgress);
            }
            Err(_) => return Err(ServiceError::StartInProgress),
        }

        if let Err(e) = self.transport.start().await {
            self.state.store(STOPPED, Ordering::SeqCst);
            log_service_event(LogLevel::Error, "start_failed", Some(e.to_string()));
            return Err(e.into());
        }

        let identity = self
            .transport
            .self_ref()
            .zip(self.transport.node_info());
        let Some((self_peer_ref, node_info)) = identity else {
            self.transport.stop().await;
            self.state.store(STOPPED, Ordering::SeqCst);
            log_service_event(LogLevel::Error, "start_failed", Some("no self identity".into()));
            return Err(ServiceError::NotStarted);
        };

        let response = StartResponse {
            self_peer_ref,
            node_info,
        };
        *self.started.lock() = Some(response.clone());
        self.state.store(RUNNING, Ordering::SeqCst);
        log_service_event(
            LogLevel::Info,
            "node_started",
            Some(response.self_peer_ref.to_string()),
        );
        Ok(response)
    }

    /// Stop the node after any in-flight attempt has unwound. No-op unless running.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.orchestrator.quiesce().await;
        self.transport.stop().await;
        *self.started.lock() = None;
        self.state.store(STOPPED, Ordering::SeqCst);
        log_service_event(LogLevel::Info, "node_stopped", None);
        Ok(())
    }

    /// Dial `enode` and wait for a definitive outcome. A connected peer is
    /// left connected.
    ///
    /// Expected negative outcomes (timeout, drop, failed handshake) are
    /// `ok: false`, not errors.
    pub async fn add_peer(
        &self,
        enode: &str,
        timeout: Option<Duration>,
    ) -> Result<AddPeerResponse, ServiceError> {
        let peer: PeerRef = enode.parse()?;
        if self.lifecycle() != Lifecycle::Running {
            return Err(ServiceError::NotRunning);
        }
        let timeout = timeout.unwrap_or(self.add_peer_timeout);
        let handle = self.orchestrator.start_attempt(peer.clone(), timeout)?;
        // A stop that began before the slot was claimed does not wait for us.
        if self.lifecycle() != Lifecycle::Running {
            handle.cancel();
            let _ = handle.finished().await;
            return Err(ServiceError::NotRunning);
        }
        let report = match handle.finished().await {
            Ok(report) => report,
            Err(_) if self.lifecycle() != Lifecycle::Running => {
                return Err(ServiceError::NotRunning)
            }
            Err(e) => return Err(e.into()),
        };

        let enode = peer.to_string();
        match report.outcome {
            ConnectionOutcome::Connected(_) => Ok(AddPeerResponse {
                ok: true,
                enode,
                reason: None,
            }),
            ConnectionOutcome::Failed(FailureReason::SubscriptionError(
                SubscriptionError::Closed,
            )) if self.lifecycle() != Lifecycle::Running => Err(ServiceError::NotRunning),
            ConnectionOutcome::Failed(FailureReason::SubscriptionError(e)) => {
                Err(ServiceError::Subscription(e))
            }
            ConnectionOutcome::Failed(reason) => Ok(AddPeerResponse {
                ok: false,
                enode,
                reason: Some(reason.to_string()),
            }),
        }
    }

    /// Ask the transport to disconnect `enode`. Does not wait for the drop.
    pub fn remove_peer(&self, enode: &str) -> Result<(), ServiceError> {
        let peer: PeerRef = enode.parse()?;
        self.transport.remove_peer(&peer);
        log_service_event(LogLevel::Info, "peer_removed", Some(peer.to_string()));
        Ok(())
    }
}
