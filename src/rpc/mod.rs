pub mod client;
pub mod server;
pub mod service;
pub mod types;

pub use client::{RpcClient, RpcError};
pub use server::{dispatch, RpcServer};
pub use service::{AddPeerResponse, Lifecycle, NodeService, ServiceConfig, ServiceError, StartResponse};
pub use types::{RpcErrorBody, RpcRequest, RpcResponse};
