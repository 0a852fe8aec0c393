// src/network/orchestrator.rs
//
// One connection attempt at a time: subscribe, watch, dial, optionally run the
// status exchange, optionally observe traffic, then disconnect or keep the peer.

use crate::constants::ETH_MAX_MESSAGE_SIZE;
use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::network::peer_event::{PeerEventKind, Subscription, SubscriptionError};
use crate::network::peer_ref::PeerRef;
use crate::network::transport::{Connection, MsgReadWriter, Transport, TransportError};
use crate::network::watcher::{ConnectionOutcome, FailureReason, Watcher};
use crate::protocol::codec::MessageReader;
use crate::protocol::error::{DecodeError, HandshakeError, ReadError};
use crate::protocol::handshake::{exchange_status, HandshakeConfig};
use crate::protocol::messages::StatusData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("another attempt is already in flight")]
    Busy,
    #[error("attempt cancelled before an outcome was produced")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Dialing,
    Watching,
    Handshaking,
    Observing,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// `None` disables the status exchange.
    pub handshake: Option<HandshakeConfig>,
    pub local_status: StatusData,
    /// How long to keep reading after a successful attempt. Zero skips it.
    pub observe: Duration,
    /// Remove the peer once the attempt ends. When off, a connected peer stays
    /// connected until `remove_peer` or transport shutdown.
    pub disconnect_on_finish: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            handshake: Some(HandshakeConfig::default()),
            local_status: StatusData::mainnet_genesis(),
            observe: Duration::ZERO,
            disconnect_on_finish: true,
        }
    }
}

/// Everything one attempt learned.
#[derive(Debug)]
pub struct AttemptReport {
    pub peer: PeerRef,
    pub outcome: ConnectionOutcome,
    pub remote_status: Option<StatusData>,
    /// Status disagreements annotated by the exchange.
    pub mismatches: Vec<DecodeError>,
}

impl AttemptReport {
    fn failed(peer: PeerRef, reason: FailureReason) -> Self {
        Self {
            peer,
            outcome: ConnectionOutcome::Failed(reason),
            remote_status: None,
            mismatches: Vec::new(),
        }
    }
}

pub struct PeerOrchestrator {
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
    inflight: watch::Sender<bool>,
}

impl PeerOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: OrchestratorConfig) -> Self {
        let (inflight, _) = watch::channel(false);
        Self {
            transport,
            config,
            inflight,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        *self.inflight.borrow()
    }

    /// Begin an attempt against `peer`. Fails fast with `Busy` when one is running.
    pub fn start_attempt(
        &self,
        peer: PeerRef,
        timeout: Duration,
    ) -> Result<AttemptHandle, OrchestratorError> {
        let claimed = self.inflight.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !claimed {
            emit_network_event(
                "orchestrator",
                LogLevel::Warn,
                "attempt_rejected_busy",
                Some(peer.short_id()),
                None,
            );
            return Err(OrchestratorError::Busy);
        }
        let guard = InflightGuard(self.inflight.clone());

        // Subscribed before the task exists, so no event after this point is missed.
        let subscription = self.transport.subscribe();
        let watcher = Watcher::new(peer.clone(), subscription, timeout);

        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(AttemptState::Dialing);
        let (report_tx, report_rx) = oneshot::channel();
        let task = AttemptTask {
            transport: self.transport.clone(),
            config: self.config.clone(),
            peer,
            cancel: cancel.clone(),
            state: state_tx,
        };
        let join = tokio::spawn(async move {
            let _guard = guard;
            task.run(watcher, report_tx).await;
        });

        Ok(AttemptHandle {
            report: report_rx,
            state: state_rx,
            cancel,
            task: join,
        })
    }

    /// Run one attempt to its report; the rest of the attempt unwinds in the background.
    pub async fn attempt(
        &self,
        peer: PeerRef,
        timeout: Duration,
    ) -> Result<AttemptReport, OrchestratorError> {
        let handle = self.start_attempt(peer, timeout)?;
        handle.report().await
    }

    /// Wait until no attempt is in flight.
    pub async fn quiesce(&self) {
        let mut rx = self.inflight.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }
}

/// Releases the in-flight slot however the attempt task ends.
struct InflightGuard(watch::Sender<bool>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

pub struct AttemptHandle {
    report: oneshot::Receiver<AttemptReport>,
    state: watch::Receiver<AttemptState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AttemptHandle {
    pub fn state(&self) -> AttemptState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<AttemptState> {
        self.state.clone()
    }

    /// Stop the attempt. No report is produced if none was sent yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the report. The attempt keeps running (observe, disconnect) afterwards.
    pub async fn report(self) -> Result<AttemptReport, OrchestratorError> {
        self.report.await.map_err(|_| OrchestratorError::Cancelled)
    }

    /// Wait for the report and then for the attempt to fully unwind.
    pub async fn finished(self) -> Result<AttemptReport, OrchestratorError> {
        let report = self.report.await.map_err(|_| OrchestratorError::Cancelled);
        let _ = self.task.await;
        report
    }
}

struct AttemptTask {
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
    peer: PeerRef,
    cancel: CancellationToken,
    state: watch::Sender<AttemptState>,
}

impl AttemptTask {
    fn set_state(&self, state: AttemptState) {
        self.state.send_replace(state);
    }

    async fn run(self, watcher: Watcher, report_tx: oneshot::Sender<AttemptReport>) {
        let addr = Some(self.peer.short_id());
        let watch = watcher.with_cancel(self.cancel.child_token()).spawn();

        emit_network_event(
            "orchestrator",
            LogLevel::Info,
            "dial",
            addr.clone(),
            Some(self.peer.to_string()),
        );
        self.transport.add_peer(&self.peer);
        self.set_state(AttemptState::Watching);

        let outcome = watch.outcome().await;
        let (report, conn) = match outcome {
            None => {
                emit_network_event("orchestrator", LogLevel::Info, "cancelled", addr, None);
                self.finish();
                return;
            }
            Some(ConnectionOutcome::Connected(peer)) => self.after_connect(peer).await,
            Some(ConnectionOutcome::Failed(reason)) => {
                (Some(AttemptReport::failed(self.peer.clone(), reason)), None)
            }
        };

        let Some(report) = report else {
            emit_network_event("orchestrator", LogLevel::Info, "cancelled", addr, None);
            self.finish();
            return;
        };
        let observe = report.outcome.is_connected() && !self.config.observe.is_zero();
        emit_network_event(
            "orchestrator",
            LogLevel::Info,
            "attempt_outcome",
            addr,
            Some(report.outcome.to_string()),
        );
        let keep = report.outcome.is_connected() && !self.config.disconnect_on_finish;
        let _ = report_tx.send(report);

        if keep {
            self.keep(conn);
            return;
        }
        if observe {
            if let Some(conn) = conn.or_else(|| self.transport.take_connection(&self.peer)) {
                self.set_state(AttemptState::Observing);
                self.observe(conn.as_ref()).await;
            }
        }
        self.finish();
    }

    /// Status exchange after the transport reported the peer connected.
    /// `None` report means cancelled mid-exchange.
    async fn after_connect(&self, peer: PeerRef) -> (Option<AttemptReport>, Option<Connection>) {
        let Some(cfg) = self.config.handshake.clone() else {
            let report = AttemptReport {
                peer: peer.clone(),
                outcome: ConnectionOutcome::Connected(peer),
                remote_status: None,
                mismatches: Vec::new(),
            };
            return (Some(report), None);
        };

        self.set_state(AttemptState::Handshaking);
        let Some(conn) = self.transport.take_connection(&peer) else {
            let err = HandshakeError::Transport(TransportError::Disconnected);
            let report = AttemptReport::failed(peer, FailureReason::HandshakeFailed(err));
            return (Some(report), None);
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return (None, Some(conn)),
            r = exchange_status(conn.as_ref(), &self.config.local_status, &cfg) => r,
        };
        let report = match result {
            Ok(hs) => AttemptReport {
                peer: peer.clone(),
                outcome: ConnectionOutcome::Connected(peer),
                remote_status: Some(hs.remote),
                mismatches: hs.mismatches,
            },
            Err(e) => AttemptReport::failed(peer, FailureReason::HandshakeFailed(e)),
        };
        (Some(report), Some(conn))
    }

    async fn observe(&self, conn: &dyn MsgReadWriter) {
        let max = self
            .config
            .handshake
            .as_ref()
            .map(|h| h.max_message_size)
            .unwrap_or(ETH_MAX_MESSAGE_SIZE);
        let mut reader = if self.config.handshake.is_some() {
            MessageReader::after_handshake(conn, max)
        } else {
            MessageReader::new(conn, max)
        };
        let addr = Some(self.peer.short_id());
        let deadline = tokio::time::sleep(self.config.observe);
        tokio::pin!(deadline);
        let mut seen = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = &mut deadline => break,
                next = reader.next() => match next {
                    Ok(_) => seen += 1,
                    // Already logged by the reader; the frame is gone, keep going.
                    Err(ReadError::Decode(_)) => continue,
                    Err(ReadError::Transport(e)) => {
                        emit_network_event(
                            "orchestrator",
                            LogLevel::Info,
                            "observe_ended",
                            addr.clone(),
                            Some(e.to_string()),
                        );
                        break;
                    }
                },
            }
        }
        emit_network_event(
            "orchestrator",
            LogLevel::Info,
            "observe_done",
            addr,
            Some(format!("messages={}", seen)),
        );
    }

    fn finish(&self) {
        self.transport.remove_peer(&self.peer);
        self.set_state(AttemptState::Idle);
    }

    /// Leave the peer connected. A connection already taken from the transport
    /// is held on its own task so the attempt slot is released.
    fn keep(&self, conn: Option<Connection>) {
        let wants_traffic = !self.config.observe.is_zero();
        let conn = conn.or_else(|| {
            if wants_traffic {
                self.transport.take_connection(&self.peer)
            } else {
                None
            }
        });
        emit_network_event(
            "orchestrator",
            LogLevel::Info,
            "peer_kept",
            Some(self.peer.short_id()),
            Some(if conn.is_some() { "held" } else { "with transport" }.to_string()),
        );
        if let Some(conn) = conn {
            let held = HeldPeer {
                events: self.transport.subscribe(),
                conn,
                handshaken: self.config.handshake.is_some(),
                max_size: self
                    .config
                    .handshake
                    .as_ref()
                    .map(|h| h.max_message_size)
                    .unwrap_or(ETH_MAX_MESSAGE_SIZE),
            };
            tokio::spawn(held.run());
        }
        self.set_state(AttemptState::Idle);
    }
}

/// A kept peer whose connection left the transport. Reads and logs traffic
/// until the peer is removed, the remote hangs up or the feed closes.
struct HeldPeer {
    events: Subscription,
    conn: Connection,
    handshaken: bool,
    max_size: u32,
}

impl HeldPeer {
    async fn run(mut self) {
        let peer = self.conn.peer().clone();
        let addr = Some(peer.short_id());
        let mut reader = if self.handshaken {
            MessageReader::after_handshake(self.conn.as_ref(), self.max_size)
        } else {
            MessageReader::new(self.conn.as_ref(), self.max_size)
        };
        let mut watching = true;
        let mut seen = 0u64;
        let why = loop {
            tokio::select! {
                biased;
                event = self.events.events.recv(), if watching => match event {
                    Some(ev) if ev.kind == PeerEventKind::Drop && ev.peer.same_peer(&peer) => {
                        break "removed".to_string();
                    }
                    Some(_) => {}
                    None => match self.events.take_error() {
                        // Overflow only costs us the removal signal; reads still end on disconnect.
                        Some(SubscriptionError::Overflow) | Some(SubscriptionError::Transport(_)) => {
                            watching = false;
                        }
                        Some(SubscriptionError::Closed) | None => break "transport stopped".to_string(),
                    },
                },
                next = reader.next() => match next {
                    Ok(_) => seen += 1,
                    Err(ReadError::Decode(_)) => continue,
                    Err(ReadError::Transport(e)) => break e.to_string(),
                },
            }
        };
        emit_network_event(
            "orchestrator",
            LogLevel::Info,
            "peer_released",
            addr,
            Some(format!("{} messages={}", why, seen)),
        );
    }
}
