use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use devp2ping::{
    cli::{self, Verdict},
    config::Config,
    constants::*,
    events::{dispatcher, model::LogLevel},
    network::{
        discovery::DiscoveryProbe,
        peer_ref::PeerRef,
        tcp::{random_node_id, TcpTransport},
        transport::Transport,
    },
    rpc::{NodeService, RpcServer},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe and manage devp2p peer connectivity")]
struct Args {
    /// Optional path to config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct ProbeArgs {
    /// Target node as enode://<id>@<ip>:<port>
    enode: String,
    /// address:port to listen at
    #[arg(short = 'a', long = "listenaddr")]
    listen_addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dial a peer and wait for it to connect or drop
    Addpeer {
        #[command(flatten)]
        target: ProbeArgs,
        /// Seconds to wait for a connect/drop outcome
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Run the eth status exchange after connecting
        #[arg(short = 's', long = "statusproto", action = ArgAction::Set)]
        status_proto: Option<bool>,
        /// Seconds to log incoming traffic after a successful attempt
        #[arg(long)]
        observe: Option<u64>,
    },
    /// Send a discovery PING and wait for the PONG
    Ping {
        #[command(flatten)]
        target: ProbeArgs,
        /// Milliseconds allowed for each response
        #[arg(short = 't', long = "resptimeout")]
        resp_timeout: Option<u64>,
    },
    /// Send a FINDNODE request (after a preliminary PING/PONG)
    Findnode {
        #[command(flatten)]
        target: ProbeArgs,
        /// Milliseconds allowed for each response
        #[arg(short = 't', long = "resptimeout")]
        resp_timeout: Option<u64>,
    },
    /// Ask a node for its neighbors of our own id
    Neighbors {
        #[command(flatten)]
        target: ProbeArgs,
    },
    /// Run the RPC facade until Ctrl+C
    Serve {
        /// RPC listen address
        #[arg(long = "rpcaddr")]
        rpc_addr: Option<String>,
        /// p2p listen address
        #[arg(short = 'a', long = "listenaddr")]
        listen_addr: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    match Config::load(path) {
        Ok(cfg) => {
            eprintln!("{}Loaded config from: {}", ICON_PLACEHOLDER, path);
            cfg
        }
        Err(err) => {
            eprintln!("❌ {}", err);
            std::process::exit(2);
        }
    }
}

fn parse_target(raw: &str) -> Result<PeerRef, String> {
    raw.parse::<PeerRef>()
        .map_err(|e| format!("invalid enode '{}': {}", raw, e))
}

async fn finish(verdict: Verdict) -> ! {
    dispatcher::flush(Duration::from_secs(1)).await;
    println!("{}", verdict);
    std::process::exit(verdict.exit_code());
}

async fn run_addpeer(config: &Config, peer: PeerRef) -> anyhow::Result<Verdict> {
    let transport = Arc::new(TcpTransport::new(config.tcp_transport_config()?));
    transport.start().await?;
    let orchestrator = config.orchestrator_config()?;
    let verdict = cli::add_peer(
        transport.clone(),
        orchestrator,
        peer,
        config.connect_timeout(),
    )
    .await;
    transport.stop().await;
    Ok(verdict)
}

async fn bind_probe(config: &Config) -> anyhow::Result<DiscoveryProbe> {
    let id = config.node_id()?.unwrap_or_else(random_node_id);
    let probe =
        DiscoveryProbe::bind(&config.listen_addr(), id, config.response_timeout()).await?;
    Ok(probe)
}

enum Probe {
    Ping,
    FindNode,
    Neighbors,
}

async fn run_probe(config: &Config, enode: &str, probe_kind: Probe) -> Verdict {
    let target = match parse_target(enode) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("❌ {}", e);
            return Verdict::Fail;
        }
    };
    let probe = match bind_probe(config).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("❌ {}", e);
            return Verdict::Fail;
        }
    };
    match probe_kind {
        Probe::Ping => cli::ping(&probe, &target).await,
        Probe::FindNode => cli::find_node(&probe, &target).await,
        Probe::Neighbors => cli::neighbors(&probe, &target).await,
    }
}

async fn run_serve(config: &Config) -> anyhow::Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(config.tcp_transport_config()?));
    let service = Arc::new(NodeService::new(transport, config.service_config()?));
    let server = RpcServer::bind(&config.rpc_listen_addr(), service.clone()).await?;
    eprintln!(
        "🟢 {} RPC listening on {}. Press Ctrl+C to shut down...",
        config.node_name(),
        server.local_addr()?
    );

    let shutdown = CancellationToken::new();
    let serve = tokio::spawn(server.serve(shutdown.clone()));
    signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    eprintln!("🛑 {} shutting down gracefully.", config.node_name());
    shutdown.cancel();
    let _ = serve.await;
    // Waits for any in-flight attempt before the transport goes away.
    service.stop().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref());

    // CLI flags take precedence over file values.
    let command = args.command;
    match &command {
        Command::Addpeer {
            target,
            timeout,
            status_proto,
            observe,
        } => {
            if let Some(addr) = &target.listen_addr {
                config.listen_addr = Some(addr.clone());
            }
            if let Some(secs) = timeout {
                config.dial.get_or_insert_with(Default::default).connect_timeout_secs = Some(*secs);
            }
            if let Some(enabled) = status_proto {
                config.handshake.get_or_insert_with(Default::default).enabled = Some(*enabled);
            }
            if let Some(secs) = observe {
                config.observe.get_or_insert_with(Default::default).secs = Some(*secs);
            }
        }
        Command::Ping {
            target,
            resp_timeout,
        }
        | Command::Findnode {
            target,
            resp_timeout,
        } => {
            if let Some(addr) = &target.listen_addr {
                config.listen_addr = Some(addr.clone());
            }
            if let Some(ms) = resp_timeout {
                config.discovery.get_or_insert_with(Default::default).resp_timeout_ms = Some(*ms);
            }
        }
        Command::Neighbors { target } => {
            if let Some(addr) = &target.listen_addr {
                config.listen_addr = Some(addr.clone());
            }
        }
        Command::Serve {
            rpc_addr,
            listen_addr,
        } => {
            if let Some(addr) = listen_addr {
                config.listen_addr = Some(addr.clone());
            }
            if let Some(addr) = rpc_addr {
                config.rpc.get_or_insert_with(Default::default).listen_addr = Some(addr.clone());
            }
        }
    }

    devp2ping::events::init_events_from_config(config.logging.as_ref()).await;
    devp2ping::emit_system_event!(
        "node",
        LogLevel::Info,
        "startup",
        Some(full_version())
    );

    let verdict = match command {
        Command::Serve { .. } => match run_serve(&config).await {
            Ok(()) => {
                dispatcher::flush(Duration::from_secs(1)).await;
                return;
            }
            Err(e) => {
                eprintln!("❌ {}", e);
                Verdict::Fail
            }
        },
        Command::Addpeer { target, .. } => match parse_target(&target.enode) {
            Ok(peer) => run_addpeer(&config, peer).await.unwrap_or_else(|e| {
                eprintln!("❌ {}", e);
                Verdict::Fail
            }),
            Err(e) => {
                eprintln!("❌ {}", e);
                Verdict::Fail
            }
        },
        Command::Ping { target, .. } => run_probe(&config, &target.enode, Probe::Ping).await,
        Command::Findnode { target, .. } => {
            run_probe(&config, &target.enode, Probe::FindNode).await
        }
        Command::Neighbors { target } => run_probe(&config, &target.enode, Probe::Neighbors).await,
    };
    finish(verdict).await;
}
