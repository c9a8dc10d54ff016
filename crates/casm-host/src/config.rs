//! Host configuration

use casm_net::HANDSHAKE_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Carrier network tag
    pub network: String,
    /// Protocol tag
    pub protocol: String,
    /// Carrier-specific listen address
    pub address: String,
    /// Bound on each connection handshake
    pub handshake_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            network: casm_net::carrier::inproc::NETWORK.to_string(),
            protocol: "casm".to_string(),
            address: String::new(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

impl HostConfig {
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.network, "inproc");
        assert_eq!(config.protocol, "casm");
        assert_eq!(config.address, "");
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: HostConfig =
            serde_json::from_str(r#"{"network": "quic", "address": "127.0.0.1:9021"}"#).unwrap();
        assert_eq!(config.network, "quic");
        assert_eq!(config.address, "127.0.0.1:9021");
        assert_eq!(config.protocol, "casm");
        assert_eq!(config.handshake_timeout, HANDSHAKE_TIMEOUT);
    }
}
