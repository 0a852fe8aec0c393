// src/utils/addr.rs
// Listen address helpers shared by the p2p, discovery and RPC endpoints.

/// Expand Go-style `":port"` into an all-interfaces bind address.
/// Anything else is returned trimmed but otherwise untouched.
pub fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.to_string(),
    }
}

