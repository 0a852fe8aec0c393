// src/rpc/server.rs

use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, RpcEvent},
};
use crate::rpc::service::NodeService;
use crate::rpc::types::{
    codes, methods, AddPeerParams, RemovePeerParams, RpcRequest, RpcResponse,
};
use crate::utils::addr::normalize_listen_addr;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn log_rpc_event(level: LogLevel, method: &str, remote: Option<String>, ok: bool, detail: Option<String>) {
    let mut meta = dispatcher::meta("rpc", level);
    meta.corr_id = Some(dispatcher::correlation_id());
    dispatcher::emit(LogEvent::Rpc(RpcEvent {
        meta,
        method: method.to_string(),
        remote,
        ok,
        detail,
    }));
}

fn parse_params<T: DeserializeOwned>(id: u64, params: Value) -> Result<T, RpcResponse> {
    serde_json::from_value(params)
        .map_err(|e| RpcResponse::err(id, codes::BAD_REQUEST, format!("invalid params: {}", e)))
}

/// Run one request line against the service.
pub async fn dispatch(service: &NodeService, line: &str) -> RpcResponse {
    let req: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return RpcResponse::err(0, codes::BAD_REQUEST, e.to_string()),
    };
    let id = req.id;
    match req.method.as_str() {
        methods::START => match service.start().await {
            Ok(started) => match serde_json::to_value(started) {
                Ok(v) => RpcResponse::ok(id, v),
                Err(e) => RpcResponse::err(id, codes::BAD_REQUEST, e.to_string()),
            },
            Err(e) => RpcResponse::err(id, e.code(), e.to_string()),
        },
        methods::STOP => match service.stop().await {
            Ok(()) => RpcResponse::ok(id, json!({})),
            Err(e) => RpcResponse::err(id, e.code(), e.to_string()),
        },
        methods::ADD_PEER => {
            let params: AddPeerParams = match parse_params(id, req.params) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            let timeout = params.timeout_secs.map(Duration::from_secs);
            match service.add_peer(&params.enode, timeout).await {
                Ok(added) => match serde_json::to_value(added) {
                    Ok(v) => RpcResponse::ok(id, v),
                    Err(e) => RpcResponse::err(id, codes::BAD_REQUEST, e.to_string()),
                },
                Err(e) => RpcResponse::err(id, e.code(), e.to_string()),
            }
        }
        methods::REMOVE_PEER => {
            let params: RemovePeerParams = match parse_params(id, req.params) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            match service.remove_peer(&params.enode) {
                Ok(()) => RpcResponse::ok(id, json!({})),
                Err(e) => RpcResponse::err(id, e.code(), e.to_string()),
            }
        }
        other => RpcResponse::err(
            id,
            codes::UNKNOWN_METHOD,
            format!("unknown method '{}'", other),
        ),
    }
}

pub struct RpcServer {
    listener: TcpListener,
    service: Arc<NodeService>,
}

impl RpcServer {
    pub async fn bind(addr: &str, service: Arc<NodeService>) -> std::io::Result<Self> {
        let addr = normalize_listen_addr(addr);
        let listener = TcpListener::bind(&addr).await?;
        log_rpc_event(
            LogLevel::Info,
            "listen",
            Some(listener.local_addr()?.to_string()),
            true,
            None,
        );
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer_addr,
                            self.service.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        log_rpc_event(LogLevel::Error, "accept", None, false, Some(e.to_string()));
                    }
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    service: Arc<NodeService>,
    shutdown: CancellationToken,
) {
    let remote = Some(peer_addr.to_string());
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = lines.next_line() => match next {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log_rpc_event(LogLevel::Warn, "read", remote.clone(), false, Some(e.to_string()));
                    break;
                }
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let method = serde_json::from_str::<RpcRequest>(&line)
            .map(|r| r.method)
            .unwrap_or_else(|_| "<malformed>".to_string());
        let response = dispatch(&service, &line).await;
        let (level, detail) = match &response.error {
            Some(err) => (LogLevel::Warn, Some(format!("{}: {}", err.code, err.message))),
            None => (LogLevel::Info, None),
        };
        log_rpc_event(level, &method, remote.clone(), response.error.is_none(), detail);

        let mut out = match serde_json::to_vec(&response) {
            Ok(v) => v,
            Err(e) => {
                log_rpc_event(LogLevel::Error, &method, remote.clone(), false, Some(e.to_string()));
                break;
            }
        };
        out.push(b'\n');
        if let Err(e) = write_half.write_all(&out).await {
            log_rpc_event(LogLevel::Warn, "write", remote.clone(), false, Some(e.to_string()));
            break;
        }
    }
}
