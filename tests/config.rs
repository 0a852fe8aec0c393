use devp2ping::config::{Config, ConfigError};
use devp2ping::constants::{DEFAULT_CONNECT_TIMEOUT, MAINNET_GENESIS_HASH, MAX_FRAME_SIZE};
use devp2ping::network::peer_ref::NodeId;
use devp2ping::protocol::handshake::ValidationPolicy;
use std::time::Duration;

#[test]
fn empty_config_resolves_to_defaults() {
    let cfg = Config::from_toml("").unwrap();
    assert_eq!(cfg.node_name(), "devp2ping");
    assert_eq!(cfg.listen_addr(), ":30301");
    assert_eq!(cfg.rpc_listen_addr(), ":8544");
    assert_eq!(cfg.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    assert_eq!(cfg.observe_duration(), Duration::ZERO);
    assert_eq!(cfg.response_timeout(), Duration::from_millis(500));
    assert!(cfg.node_id().unwrap().is_none());

    let hs = cfg.handshake_config().unwrap();
    assert_eq!(hs.timeout, Duration::from_secs(2));
    assert_eq!(hs.policy, ValidationPolicy::Annotate);

    let status = cfg.local_status().unwrap();
    assert_eq!(status.network_id, 1);
    assert_eq!(status.genesis_block, MAINNET_GENESIS_HASH);
    assert_eq!(cfg.service_config().unwrap().add_peer_timeout, Duration::from_secs(15));
    assert_eq!(cfg.tcp_transport_config().unwrap().max_frame_size, MAX_FRAME_SIZE);
}

#[test]
fn sections_override_defaults() {
    let id = "ab".repeat(64);
    let toml = format!(
        r#"
node_name = "probe-1"
listen_addr = "127.0.0.1:40404"

[node]
id = "0x{id}"

[dial]
connect_timeout_secs = 7

[handshake]
timeout_ms = 750
policy = "strict"
network_id = 5
genesis_hash = "0xbf7e331f7f7c1dd2e05159666b3bf8bc7a8a3a9eb1d518969eab529dd9b88c1a"
total_difficulty = "0x10"

[observe]
secs = 12

[rpc]
listen_addr = "127.0.0.1:9000"
add_peer_timeout_secs = 3

[discovery]
resp_timeout_ms = 250

[logging]
disable_console = true
console_level = "debug"
"#
    );
    let cfg = Config::from_toml(&toml).unwrap();
    assert_eq!(cfg.node_name(), "probe-1");
    assert_eq!(cfg.node_id().unwrap(), Some(NodeId::repeat_byte(0xab)));
    assert_eq!(cfg.connect_timeout(), Duration::from_secs(7));
    assert_eq!(cfg.observe_duration(), Duration::from_secs(12));
    assert_eq!(cfg.response_timeout(), Duration::from_millis(250));

    let orch = cfg.orchestrator_config().unwrap();
    let hs = orch.handshake.unwrap();
    assert_eq!(hs.timeout, Duration::from_millis(750));
    assert_eq!(hs.policy, ValidationPolicy::Strict);
    assert_eq!(orch.local_status.network_id, 5);
    assert_eq!(orch.local_status.total_difficulty, alloy_primitives::U256::from(16u64));
    assert_eq!(orch.local_status.current_block, orch.local_status.genesis_block);

    let svc = cfg.service_config().unwrap();
    assert_eq!(svc.add_peer_timeout, Duration::from_secs(3));
    let tcp = cfg.tcp_transport_config().unwrap();
    assert_eq!(tcp.listen_addr, "127.0.0.1:40404");
    assert_eq!(tcp.name, "probe-1");
    assert_eq!(cfg.logging.unwrap().disable_console, Some(true));
}

#[test]
fn disabled_handshake_has_no_config() {
    let cfg = Config::from_toml("[handshake]\nenabled = false\n").unwrap();
    assert!(!cfg.handshake_enabled());
    assert!(cfg.orchestrator_config().unwrap().handshake.is_none());
}

#[test]
fn invalid_values_are_reported() {
    let cfg = Config::from_toml("[handshake]\ngenesis_hash = \"0x1234\"\n").unwrap();
    assert!(matches!(
        cfg.local_status(),
        Err(ConfigError::Invalid { field: "handshake.genesis_hash", .. })
    ));

    let cfg = Config::from_toml("[node]\nid = \"abcd\"\n").unwrap();
    assert!(matches!(
        cfg.node_id(),
        Err(ConfigError::Invalid { field: "node.id", .. })
    ));
    assert!(cfg.tcp_transport_config().is_err());

    assert!(matches!(
        Config::from_toml("[handshake]\npolicy = \"sometimes\"\n"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn load_reads_file_and_reports_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("devp2ping.toml");
    std::fs::write(&path, "node_name = \"from-file\"\n").unwrap();
    assert_eq!(Config::load(&path).unwrap().node_name(), "from-file");

    let missing = tmp.path().join("nope.toml");
    assert!(matches!(Config::load(&missing), Err(ConfigError::Read { .. })));
}
