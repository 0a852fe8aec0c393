// src/rpc/client.rs

use crate::rpc::types::{RpcErrorBody, RpcRequest, RpcResponse};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("response id {got} does not match request id {want}")]
    IdMismatch { got: u64, want: u64 },
    #[error("{}: {}", .0.code, .0.message)]
    Remote(RpcErrorBody),
}

impl RpcError {
    /// Wire error code when the server rejected the call.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            RpcError::Remote(body) => Some(&body.code),
            _ => None,
        }
    }
}

pub struct RpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl RpcClient {
    pub async fn connect(addr: &str) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer,
            next_id: 1,
        })
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id;
        self.next_id += 1;
        let req = RpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_vec(&req)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;

        let reply = self.lines.next_line().await?.ok_or(RpcError::Closed)?;
        let resp: RpcResponse = serde_json::from_str(&reply)?;
        if resp.id != id {
            return Err(RpcError::IdMismatch { got: resp.id, want: id });
        }
        match (resp.result, resp.error) {
            (_, Some(err)) => Err(RpcError::Remote(err)),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}
