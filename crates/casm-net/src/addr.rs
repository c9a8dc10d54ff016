//! Host addresses

use crate::id::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Address of a host: its identity plus carrier-specific location
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addr {
    id: PeerId,
    network: String,
    protocol: String,
    address: String,
}

impl Addr {
    pub fn new(
        id: PeerId,
        network: impl Into<String>,
        protocol: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            network: network.into(),
            protocol: protocol.into(),
            address: address.into(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Carrier network tag (e.g. `inproc`, `quic`)
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Protocol tag spoken on top of the carrier
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Carrier-specific location string
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Text form: `<id-hex>/<network>/<protocol>/<address>`
impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.id, self.network, self.protocol, self.address
        )
    }
}

/// Address parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("expected <id>/<network>/<protocol>/<address>, got {0:?}")]
    Shape(String),
    #[error("invalid peer id: {0:?}")]
    PeerId(String),
}

impl FromStr for Addr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, '/');
        let (Some(id), Some(network), Some(protocol), Some(address)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AddrParseError::Shape(s.to_string()));
        };

        let id = id
            .parse::<PeerId>()
            .map_err(|_| AddrParseError::PeerId(id.to_string()))?;

        Ok(Self::new(id, network, protocol, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_covers_every_field() {
        let a = Addr::new(PeerId(1), "inproc", "casm", "/a");
        assert_eq!(a, Addr::new(PeerId(1), "inproc", "casm", "/a"));
        assert_ne!(a, Addr::new(PeerId(2), "inproc", "casm", "/a"));
        assert_ne!(a, Addr::new(PeerId(1), "quic", "casm", "/a"));
        assert_ne!(a, Addr::new(PeerId(1), "inproc", "other", "/a"));
        assert_ne!(a, Addr::new(PeerId(1), "inproc", "casm", "/b"));
    }

    #[test]
    fn test_text_form_keeps_slashes_in_address() {
        let a = Addr::new(PeerId(0xbeef), "inproc", "casm", "/test/listener");
        let text = a.to_string();
        assert_eq!(text, "000000000000beef/inproc/casm//test/listener");
        assert_eq!(text.parse::<Addr>().unwrap(), a);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "deadbeef/quic".parse::<Addr>(),
            Err(AddrParseError::Shape(_))
        ));
        assert!(matches!(
            "zz/quic/casm/127.0.0.1:9000".parse::<Addr>(),
            Err(AddrParseError::PeerId(_))
        ));
    }

    #[test]
    fn test_json_shape() {
        let a = Addr::new(PeerId(3), "quic", "casm", "127.0.0.1:9000");
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["address"], "127.0.0.1:9000");
    }
}
