// src/network/peer_event.rs

use crate::constants::PEER_FEED_BUFFER;
use crate::network::peer_ref::PeerRef;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerEventKind {
    Add,
    Drop,
}

/// Peer lifecycle notification published by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub kind: PeerEventKind,
    pub peer: PeerRef,
}

impl PeerEvent {
    pub fn added(peer: PeerRef) -> Self {
        Self {
            kind: PeerEventKind::Add,
            peer,
        }
    }

    pub fn dropped(peer: PeerRef) -> Self {
        Self {
            kind: PeerEventKind::Drop,
            peer,
        }
    }
}

impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PeerEventKind::Add => "add",
            PeerEventKind::Drop => "drop",
        };
        write!(f, "{} {}", kind, self.peer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("subscriber fell behind the event feed")]
    Overflow,
    #[error("event feed closed")]
    Closed,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// One consumer's view of the feed: buffered events plus a one-shot error slot.
/// Dropping it unsubscribes.
pub struct Subscription {
    pub events: mpsc::Receiver<PeerEvent>,
    pub errors: oneshot::Receiver<SubscriptionError>,
}

impl Subscription {
    /// Error that terminated this subscription, if one was recorded.
    pub fn take_error(&mut self) -> Option<SubscriptionError> {
        self.errors.try_recv().ok()
    }
}

struct Subscriber {
    events: mpsc::Sender<PeerEvent>,
    errors: oneshot::Sender<SubscriptionError>,
}

#[derive(Default)]
struct FeedInner {
    subscribers: Vec<Subscriber>,
    closed: bool,
}

/// Fan-out of peer events to any number of subscriptions.
///
/// Subscribing is synchronous: an event sent after `subscribe` returns is
/// buffered for that subscription even if its consumer has not started yet.
#[derive(Clone, Default)]
pub struct PeerFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl PeerFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (events_tx, events_rx) = mpsc::channel(PEER_FEED_BUFFER);
        let (errors_tx, errors_rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.closed {
            let _ = errors_tx.send(SubscriptionError::Closed);
        } else {
            inner.subscribers.push(Subscriber {
                events: events_tx,
                errors: errors_tx,
            });
        }
        Subscription {
            events: events_rx,
            errors: errors_rx,
        }
    }

    /// Deliver an event to every live subscription; returns how many got it.
    /// A subscription whose buffer is full is failed with `Overflow`.
    pub fn send(&self, event: PeerEvent) -> usize {
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        let mut kept = Vec::with_capacity(inner.subscribers.len());
        for sub in inner.subscribers.drain(..) {
            match sub.events.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    kept.push(sub);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let _ = sub.errors.send(SubscriptionError::Overflow);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        inner.subscribers = kept;
        delivered
    }

    /// Terminate every current subscription with `err`.
    pub fn fail_all(&self, err: SubscriptionError) {
        let mut inner = self.inner.lock();
        for sub in inner.subscribers.drain(..) {
            let _ = sub.errors.send(err.clone());
        }
    }

    /// Terminate every subscription and refuse new ones until `reopen`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        for sub in inner.subscribers.drain(..) {
            let _ = sub.errors.send(SubscriptionError::Closed);
        }
    }

    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.events.is_closed());
        inner.subscribers.len()
    }
}
