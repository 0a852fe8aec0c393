pub mod discovery;
pub(crate) mod events;
pub mod memory;
pub mod orchestrator;
pub mod peer_event;
pub mod peer_ref;
pub mod tcp;
pub mod transport;
pub mod watcher;

pub use discovery::{DiscoveryError, DiscoveryProbe, DiscoveryResponder};
pub use memory::{pipe, MemoryConn, MemoryTransport};
pub use orchestrator::{
    AttemptHandle, AttemptReport, AttemptState, OrchestratorConfig, OrchestratorError,
    PeerOrchestrator,
};
pub use peer_event::{PeerEvent, PeerEventKind, PeerFeed, Subscription, SubscriptionError};
pub use peer_ref::{NodeId, PeerRef, PeerRefError};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use transport::{Connection, MsgReadWriter, NodeInfo, Transport, TransportError, WireMessage};
pub use watcher::{ConnectionOutcome, FailureReason, WatchHandle, Watcher};
