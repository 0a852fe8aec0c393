//! devp2ping public prelude.
//! Import with: `use devp2ping::prelude::*;`

pub use crate::config::Config;
pub use crate::network::orchestrator::{
    AttemptReport, OrchestratorConfig, OrchestratorError, PeerOrchestrator,
};
pub use crate::network::peer_ref::{NodeId, PeerRef};
pub use crate::network::transport::{MsgReadWriter, Transport};
pub use crate::network::watcher::{ConnectionOutcome, FailureReason};
pub use crate::protocol::handshake::{HandshakeConfig, ValidationPolicy};
pub use crate::protocol::messages::StatusData;
pub use crate::rpc::service::{NodeService, ServiceConfig};
