//! # devp2ping
//!
//! Operator tool for probing and managing connectivity to devp2p peers.
//!
//! * Dial one peer identified by an enode record and wait, with a bounded
//!   timeout, for a definitive connect or drop outcome.
//! * Optionally run the `eth` status exchange over the new connection and
//!   validate the remote's network id, genesis and protocol version.
//! * Decode and log a handful of well-known `eth/63` messages.
//! * Expose start/stop and add/remove peer over a JSON-lines RPC port.
//!
//! ## Key Modules
//! * `network` – Transport seam, peer event feed, outcome watcher, orchestrator,
//!   TCP and in-memory transports, discovery probe.
//! * `protocol` – `eth` payload shapes, message codec, status handshake.
//! * `rpc` – Management facade and its JSON-lines server/client.
//! * `cli` – Command bodies behind the `devp2ping` binary.
//! * `config` – TOML configuration resolved into typed runtime configs.
//! * `events` – Structured logging/events dispatcher.
//!
//! No encryption is implemented: the TCP transport is plaintext framing only.

pub mod cli;
pub mod config;
pub mod constants;
pub mod events;
pub mod network;
pub mod prelude; // curated re-exports
pub mod protocol;
pub mod rpc;
pub mod utils; // address helpers
