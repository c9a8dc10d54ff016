//! Configuration for casmd

use casm_host::HostConfig;
use casm_net::carrier::quic;
use casm_net::Addr;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// casmd - CASM peer host daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "casmd")]
#[command(about = "CASM peer host daemon")]
pub struct Config {
    /// Listen address for QUIC connections; also announced to dialed peers
    #[arg(short, long, default_value = "127.0.0.1:9021", env = "CASM_LISTEN")]
    pub listen: SocketAddr,

    /// Bootstrap peers (comma-separated `<id>/quic/<protocol>/<ip:port>`)
    #[arg(long, value_delimiter = ',', env = "CASM_BOOTSTRAP")]
    pub bootstrap: Vec<Addr>,

    /// Handshake deadline in seconds
    #[arg(long, default_value = "5")]
    pub handshake_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.handshake_timeout_secs == 0 {
            anyhow::bail!("Handshake timeout must be at least one second");
        }
        if self.listen.port() == 0 {
            anyhow::bail!("Listen port must be fixed; it is announced to peers");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        for peer in &self.bootstrap {
            if peer.network() != quic::NETWORK {
                anyhow::bail!("Bootstrap peer {} is not a {} address", peer, quic::NETWORK);
            }
            if peer.address().parse::<SocketAddr>().is_err() {
                anyhow::bail!("Bootstrap peer {} has no socket address", peer);
            }
        }
        Ok(())
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig::default()
            .with_network(quic::NETWORK)
            .with_address(self.listen.to_string())
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["casmd"]).unwrap();
        config.validate().unwrap();
        assert!(config.bootstrap.is_empty());

        let host = config.host_config();
        assert_eq!(host.network, "quic");
        assert_eq!(host.address, "127.0.0.1:9021");
        assert_eq!(host.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bootstrap_list() {
        let config = Config::try_parse_from([
            "casmd",
            "--bootstrap",
            "00000000000000aa/quic/casm/10.0.0.1:9021,00000000000000bb/quic/casm/10.0.0.2:9021",
        ])
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.bootstrap.len(), 2);
        assert_eq!(config.bootstrap[1].address(), "10.0.0.2:9021");
    }

    #[test]
    fn test_rejects_non_quic_bootstrap() {
        let config =
            Config::try_parse_from(["casmd", "--bootstrap", "00000000000000aa/inproc/casm/a"])
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_ephemeral_listen_port() {
        let config = Config::try_parse_from(["casmd", "--listen", "127.0.0.1:0"]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let config = Config::try_parse_from(["casmd", "--log-format", "xml"]).unwrap();
        assert!(config.validate().is_err());
    }
}
