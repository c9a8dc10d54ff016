//! CASM host
//!
//! A host owns one peer identity, accepts and dials connections through a
//! carrier, keeps at most one connection per peer and routes inbound
//! streams to handlers by path.

pub mod config;
pub mod error;
pub mod host;
pub mod mux;
pub mod network;
pub mod peers;
pub mod streams;

pub use config::HostConfig;
pub use error::HostError;
pub use host::Host;
pub use mux::{Handler, Mux};
pub use network::Network;
pub use peers::PeerTable;
pub use streams::StreamManager;
