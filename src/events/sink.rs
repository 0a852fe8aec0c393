use crate::{
    constants::ICON_PLACEHOLDER,
    events::model::{LogEvent, LogLevel},
};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn handle(&self, event: &LogEvent);
    async fn flush(&self) {}
}

/// Human readable sink. Writes to stderr so stdout stays reserved for
/// command verdicts.
pub struct ConsoleSink {
    level_filter: Option<LogLevel>,
}
impl ConsoleSink {
    pub fn new(level_filter: Option<LogLevel>) -> Self {
        Self { level_filter }
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    async fn handle(&self, event: &LogEvent) {
        let meta = event.meta();
        if meta.suppress_console {
            return;
        }
        if let Some(min) = self.level_filter {
            if meta.level < min {
                return;
            }
        }
        match event {
            LogEvent::Network(n) => {
                eprintln!(
                    "{}NET [{}] action={} addr={:?} detail={:?} corr={:?}",
                    ICON_PLACEHOLDER, n.meta.component, n.action, n.addr, n.detail, n.meta.corr_id
                );
            }
            LogEvent::Protocol(p) => {
                eprintln!(
                    "{}PROTO kind={} code={:?} peer={:?} detail={:?}",
                    ICON_PLACEHOLDER, p.kind, p.code, p.peer, p.detail
                );
            }
            LogEvent::Rpc(r) => {
                eprintln!(
                    "{}RPC method={} ok={} remote={:?} detail={:?} corr={:?}",
                    ICON_PLACEHOLDER, r.method, r.ok, r.remote, r.detail, r.meta.corr_id
                );
            }
            LogEvent::System(s) => {
                eprintln!(
                    "{}SYS action={} detail={:?} corr={:?}",
                    ICON_PLACEHOLDER, s.action, s.detail, s.meta.corr_id
                );
            }
        }
    }
}

/// JSON-lines file sink with size-based rotation.
///
/// When the live file reaches `max_size_bytes` it becomes `<path>.1`, older
/// backups shift up by one, and anything past `max_backups` is overwritten.
pub struct JsonFileSink {
    path: std::path::PathBuf,
    rotate: bool,
    max_size_bytes: u64,
    max_backups: u32,
    state: tokio::sync::Mutex<JsonFileState>,
}

struct JsonFileState {
    file: Option<tokio::fs::File>,
    written: u64,
}

fn backup_path(path: &std::path::Path, idx: u32) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", idx));
    name.into()
}

async fn open_append(path: &std::path::Path) -> std::io::Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
    Ok((file, len))
}

impl JsonFileSink {
    pub async fn new<P: Into<std::path::PathBuf>>(
        path: P,
        rotate: bool,
        max_size_bytes: u64,
        max_backups: u32,
    ) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let (file, written) = open_append(&path).await?;
        Ok(Self {
            path,
            rotate,
            max_size_bytes,
            max_backups,
            state: tokio::sync::Mutex::new(JsonFileState {
                file: Some(file),
                written,
            }),
        })
    }

    async fn rotate_locked(&self, state: &mut JsonFileState) -> std::io::Result<()> {
        if let Some(mut f) = state.file.take() {
            let _ = f.flush().await;
        }
        for idx in (1..self.max_backups).rev() {
            let from = backup_path(&self.path, idx);
            if tokio::fs::try_exists(&from).await.unwrap_or(false) {
                tokio::fs::rename(&from, backup_path(&self.path, idx + 1)).await?;
            }
        }
        if self.max_backups > 0 {
            tokio::fs::rename(&self.path, backup_path(&self.path, 1)).await?;
        } else {
            tokio::fs::remove_file(&self.path).await?;
        }
        let (file, written) = open_append(&self.path).await?;
        state.file = Some(file);
        state.written = written;
        Ok(())
    }
}

#[async_trait]
impl LogSink for JsonFileSink {
    async fn handle(&self, event: &LogEvent) {
        let Ok(mut line) = serde_json::to_vec(event) else {
            return;
        };
        line.push(b'\n');
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if self.rotate && state.written >= self.max_size_bytes {
            if let Err(e) = self.rotate_locked(state).await {
                eprintln!("⚠️ event log rotation failed: {}", e);
            }
        }
        if let Some(f) = state.file.as_mut() {
            if f.write_all(&line).await.is_ok() {
                state.written += line.len() as u64;
            }
        }
    }

    async fn flush(&self) {
        let mut state = self.state.lock().await;
        if let Some(f) = state.file.as_mut() {
            let _ = f.flush().await;
            let _ = f.sync_data().await;
        }
    }
}
