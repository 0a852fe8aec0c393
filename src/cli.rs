// src/cli.rs
//
// Command bodies for the `devp2ping` binary. Each takes already-built
// components, makes one call, and reduces the result to a verdict.

use crate::events::model::LogLevel;
use crate::network::discovery::DiscoveryProbe;
use crate::network::orchestrator::{OrchestratorConfig, PeerOrchestrator};
use crate::network::peer_ref::PeerRef;
use crate::network::transport::Transport;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The only thing a command prints to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Fail,
}

impl Verdict {
    pub fn from_success(ok: bool) -> Self {
        if ok {
            Verdict::Ok
        } else {
            Verdict::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Fail => "FAIL",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Ok => 0,
            Verdict::Fail => 1,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn log_command(level: LogLevel, action: &str, detail: String) {
    crate::emit_system_event!("cli", level, action, Some(detail));
}

/// Dial `peer` over an already started transport and wait for the full attempt.
pub async fn add_peer(
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
    peer: PeerRef,
    timeout: Duration,
) -> Verdict {
    let orchestrator = PeerOrchestrator::new(transport, config);
    let handle = match orchestrator.start_attempt(peer.clone(), timeout) {
        Ok(h) => h,
        Err(e) => {
            log_command(LogLevel::Error, "addpeer", format!("{}: {}", peer, e));
            return Verdict::Fail;
        }
    };
    match handle.finished().await {
        Ok(report) => {
            let level = if report.outcome.is_connected() {
                LogLevel::Info
            } else {
                LogLevel::Warn
            };
            log_command(level, "addpeer", format!("{}: {}", peer, report.outcome));
            for mismatch in &report.mismatches {
                log_command(LogLevel::Warn, "status_mismatch", mismatch.to_string());
            }
            Verdict::from_success(report.outcome.is_connected())
        }
        Err(e) => {
            log_command(LogLevel::Error, "addpeer", format!("{}: {}", peer, e));
            Verdict::Fail
        }
    }
}

pub async fn ping(probe: &DiscoveryProbe, target: &PeerRef) -> Verdict {
    match probe.ping(target).await {
        Ok(rtt) => {
            log_command(LogLevel::Info, "ping", format!("{} rtt={:?}", target, rtt));
            Verdict::Ok
        }
        Err(e) => {
            log_command(LogLevel::Warn, "ping", format!("{}: {}", target, e));
            Verdict::Fail
        }
    }
}

/// Ask `target` for nodes near its own id.
pub async fn find_node(probe: &DiscoveryProbe, target: &PeerRef) -> Verdict {
    match probe.find_node(target, target.id()).await {
        Ok(nodes) => {
            log_command(
                LogLevel::Info,
                "findnode",
                format!("{} returned {} nodes", target, nodes.len()),
            );
            Verdict::Ok
        }
        Err(e) => {
            log_command(LogLevel::Warn, "findnode", format!("{}: {}", target, e));
            Verdict::Fail
        }
    }
}

/// Ask `target` for nodes near our id. An empty answer is still an answer.
pub async fn neighbors(probe: &DiscoveryProbe, target: &PeerRef) -> Verdict {
    match probe.neighbors(target).await {
        Ok(nodes) => {
            log_command(
                LogLevel::Info,
                "neighbors",
                format!("{} returned {} nodes", target, nodes.len()),
            );
            Verdict::Ok
        }
        Err(e) => {
            log_command(LogLevel::Warn, "neighbors", format!("{}: {}", target, e));
            Verdict::Fail
        }
    }
}
