// src/network/watcher.rs
//
// Reduces a peer event subscription, its error slot, a timer and a
// cancellation signal to a single connection outcome.

use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::network::peer_event::{PeerEventKind, Subscription, SubscriptionError};
use crate::network::peer_ref::PeerRef;
use crate::protocol::error::HandshakeError;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum FailureReason {
    /// The transport reported the target as dropped.
    Dropped,
    SubscriptionError(SubscriptionError),
    TimedOut,
    /// Transport connection succeeded but the status exchange did not.
    HandshakeFailed(HandshakeError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Dropped => write!(f, "peer dropped"),
            FailureReason::SubscriptionError(e) => write!(f, "subscription error: {}", e),
            FailureReason::TimedOut => write!(f, "timed out"),
            FailureReason::HandshakeFailed(e) => write!(f, "handshake failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub enum ConnectionOutcome {
    Connected(PeerRef),
    Failed(FailureReason),
}

impl ConnectionOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionOutcome::Connected(_))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ConnectionOutcome::Connected(_) => None,
            ConnectionOutcome::Failed(reason) => Some(reason),
        }
    }
}

impl fmt::Display for ConnectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionOutcome::Connected(peer) => write!(f, "connected to {}", peer),
            ConnectionOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Waits for a definitive outcome for one target peer.
pub struct Watcher {
    target: PeerRef,
    subscription: Subscription,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Watcher {
    pub fn new(target: PeerRef, subscription: Subscription, timeout: Duration) -> Self {
        Self {
            target,
            subscription,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop when `cancel` fires. The watcher never cancels the token itself.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run to completion. `None` only when cancelled.
    pub async fn run(self) -> Option<ConnectionOutcome> {
        let Watcher {
            target,
            mut subscription,
            timeout,
            cancel,
        } = self;
        let addr = Some(target.short_id());
        let timer = tokio::time::sleep(timeout);
        tokio::pin!(timer);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    emit_network_event("watcher", LogLevel::Debug, "cancelled", addr.clone(), None);
                    break None;
                }
                event = subscription.events.recv() => match event {
                    Some(ev) if ev.peer.same_peer(&target) => match ev.kind {
                        PeerEventKind::Add => break Some(ConnectionOutcome::Connected(ev.peer)),
                        PeerEventKind::Drop => break Some(ConnectionOutcome::Failed(FailureReason::Dropped)),
                    },
                    Some(ev) => {
                        emit_network_event(
                            "watcher",
                            LogLevel::Debug,
                            "unrelated_event",
                            Some(ev.peer.short_id()),
                            Some(ev.to_string()),
                        );
                    }
                    None => {
                        let err = subscription.take_error().unwrap_or(SubscriptionError::Closed);
                        break Some(ConnectionOutcome::Failed(FailureReason::SubscriptionError(err)));
                    }
                },
                err = &mut subscription.errors => {
                    let err = err.unwrap_or(SubscriptionError::Closed);
                    break Some(ConnectionOutcome::Failed(FailureReason::SubscriptionError(err)));
                }
                _ = &mut timer => break Some(ConnectionOutcome::Failed(FailureReason::TimedOut)),
            }
        };

        if let Some(outcome) = &outcome {
            let level = match outcome {
                ConnectionOutcome::Failed(FailureReason::SubscriptionError(_)) => LogLevel::Error,
                _ => LogLevel::Info,
            };
            emit_network_event("watcher", level, "outcome", addr, Some(outcome.to_string()));
        }
        outcome
    }

    /// Run on its own task.
    pub fn spawn(self) -> WatchHandle {
        let cancel = self.cancel.clone();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            if let Some(outcome) = self.run().await {
                let _ = tx.send(outcome);
            }
        });
        WatchHandle {
            outcome: rx,
            cancel,
            task,
        }
    }
}

/// A spawned watcher. The outcome channel is written at most once.
pub struct WatchHandle {
    outcome: oneshot::Receiver<ConnectionOutcome>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the outcome; `None` if the watcher was cancelled first.
    pub async fn outcome(self) -> Option<ConnectionOutcome> {
        let outcome = self.outcome.await.ok();
        let _ = self.task.await;
        outcome
    }
}
