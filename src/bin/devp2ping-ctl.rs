use clap::{Parser, Subcommand};
use devp2ping::constants::DEFAULT_RPC_ADDR;
use devp2ping::rpc::types::{methods, AddPeerParams, RemovePeerParams};
use devp2ping::rpc::RpcClient;
use devp2ping::utils::addr::normalize_listen_addr;
use serde_json::{json, Value};

/// devp2ping-ctl: drive a running `devp2ping serve` over its RPC port.
///
/// Prints the JSON result of the call on success. RPC errors go to stderr
/// with exit code 1.
#[derive(Parser, Debug)]
#[command(name = "devp2ping-ctl", version, about = "RPC client for devp2ping serve")]
struct Cli {
    /// RPC address of the node
    #[arg(short, long, default_value = DEFAULT_RPC_ADDR)]
    rpc: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the p2p node
    Start,
    /// Stop the p2p node (no-op when stopped)
    Stop,
    /// Dial a peer and wait for the outcome
    AddPeer {
        enode: String,
        /// Seconds to wait; server default when omitted
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Disconnect a peer without waiting for the drop
    RemovePeer { enode: String },
}

/// `":8544"` dials the local host.
fn dial_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("127.0.0.1:{}", port),
        None => normalize_listen_addr(addr),
    }
}

fn request(command: Commands) -> anyhow::Result<(&'static str, Value)> {
    Ok(match command {
        Commands::Start => (methods::START, json!({})),
        Commands::Stop => (methods::STOP, json!({})),
        Commands::AddPeer { enode, timeout } => (
            methods::ADD_PEER,
            serde_json::to_value(AddPeerParams {
                enode,
                timeout_secs: timeout,
            })?,
        ),
        Commands::RemovePeer { enode } => (
            methods::REMOVE_PEER,
            serde_json::to_value(RemovePeerParams { enode })?,
        ),
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let addr = dial_addr(&cli.rpc);

    let (method, params) = match request(cli.command) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("❌ Failed to build request: {}", err);
            std::process::exit(2);
        }
    };
    let mut client = match RpcClient::connect(&addr).await {
        Ok(c) => c,
        Err(err) => {
            eprintln!("❌ Failed to connect to {}: {}", addr, err);
            std::process::exit(1);
        }
    };
    match client.call(method, params).await {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", result),
        },
        Err(err) => {
            eprintln!("❌ {} failed: {}", method, err);
            std::process::exit(1);
        }
    }
}
