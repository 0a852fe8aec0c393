use crate::events::model::{EventMeta, LogEvent, LogLevel};
use crate::events::sink::LogSink;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use uuid::Uuid;

static DISPATCHER: OnceCell<EventDispatcher> = OnceCell::new();

pub struct EventDispatcher {
    pub tx: mpsc::Sender<LogEvent>,
    pub session_id: String,
    sinks: RwLock<Vec<Arc<dyn LogSink>>>,
    emitted: AtomicU64,
    handled: AtomicU64,
}

impl EventDispatcher {
    pub fn global() -> Option<&'static EventDispatcher> {
        DISPATCHER.get()
    }
    pub fn register_sink(&self, sink: Arc<dyn LogSink>) {
        self.sinks.write().push(sink);
    }
}

/// Install the process-wide dispatcher. Only the first call wins; later calls
/// register their sinks on the existing dispatcher instead.
pub async fn init_events(sinks: Vec<Arc<dyn LogSink>>, capacity: usize) {
    if let Some(existing) = EventDispatcher::global() {
        for sink in sinks {
            existing.register_sink(sink);
        }
        return;
    }
    let (tx, mut rx) = mpsc::channel::<LogEvent>(capacity);
    let dispatcher = EventDispatcher {
        tx,
        session_id: Uuid::new_v4().to_string(),
        sinks: RwLock::new(sinks),
        emitted: AtomicU64::new(0),
        handled: AtomicU64::new(0),
    };
    if DISPATCHER.set(dispatcher).is_err() {
        return;
    }
    tokio::spawn(async move {
        while let Some(evt) = rx.recv().await {
            if let Some(d) = EventDispatcher::global() {
                let sinks = d.sinks.read().clone();
                for sink in sinks {
                    sink.handle(&evt).await;
                }
                d.handled.fetch_add(1, Ordering::Release);
            }
        }
    });
}

pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

pub fn meta(component: &'static str, level: LogLevel) -> EventMeta {
    let session_id = EventDispatcher::global()
        .map(|d| d.session_id.clone())
        .unwrap_or_else(|| "unknown".into());
    EventMeta {
        ts: SystemTime::now(),
        level,
        corr_id: None,
        session_id,
        component,
        suppress_console: false,
    }
}

pub fn emit(event: LogEvent) {
    if let Some(d) = EventDispatcher::global() {
        if d.tx.try_send(event).is_ok() {
            d.emitted.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Wait until every event emitted so far has been handed to all sinks, then
/// flush the sinks. Gives up after `timeout`.
pub async fn flush(timeout: Duration) {
    let Some(d) = EventDispatcher::global() else {
        return;
    };
    let target = d.emitted.load(Ordering::Acquire);
    let deadline = tokio::time::Instant::now() + timeout;
    while d.handled.load(Ordering::Acquire) < target {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let sinks = d.sinks.read().clone();
    for sink in sinks {
        sink.flush().await;
    }
}
