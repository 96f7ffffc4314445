//! Bootstrap peer configuration.
//!
//! Bootstrap multiaddrs come from the `MURMURE_BOOTSTRAP` environment
//! variable (comma-separated); when it is unset or empty the compiled-in
//! default list is used. Malformed entries are logged and skipped.

use libp2p::Multiaddr;
use tracing::{debug, info, warn};

use murmure_shared::constants::{BOOTSTRAP_ENV, DEFAULT_BOOTSTRAP};

/// Parse a list of multiaddr strings into validated `Multiaddr` values.
pub fn parse_multiaddrs<S: AsRef<str>>(raw: &[S]) -> Vec<Multiaddr> {
    raw.iter()
        .filter_map(|s| {
            let s = s.as_ref().trim();
            if s.is_empty() {
                return None;
            }
            match s.parse::<Multiaddr>() {
                Ok(addr) => {
                    debug!(addr = %addr, "Loaded bootstrap peer");
                    Some(addr)
                }
                Err(e) => {
                    warn!(addr = %s, error = %e, "Skipping invalid multiaddr");
                    None
                }
            }
        })
        .collect()
}

/// Resolve the bootstrap list from the environment, falling back to the
/// compiled-in defaults.
pub fn bootstrap_peers() -> Vec<Multiaddr> {
    let addrs = match std::env::var(BOOTSTRAP_ENV) {
        Ok(value) if !value.trim().is_empty() => {
            let raw: Vec<&str> = value.split(',').collect();
            parse_multiaddrs(&raw)
        }
        _ => parse_multiaddrs(DEFAULT_BOOTSTRAP),
    };

    info!(count = addrs.len(), "Resolved bootstrap peers");
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiaddrs_skips_invalid() {
        let raw = vec![
            "/ip4/127.0.0.1/udp/4001/quic-v1".to_string(),
            "not-a-multiaddr".to_string(),
            " /ip4/10.0.0.1/udp/4001/quic-v1 ".to_string(),
            "".to_string(),
        ];
        let addrs = parse_multiaddrs(&raw);
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn test_defaults_parse() {
        let addrs = parse_multiaddrs(DEFAULT_BOOTSTRAP);
        assert_eq!(addrs.len(), DEFAULT_BOOTSTRAP.len());
    }
}
