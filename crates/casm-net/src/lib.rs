//! Networking primitives for CASM hosts
//!
//! This crate provides:
//! - Peer identities and addresses
//! - Pluggable carriers (in-process and QUIC)
//! - The dialback handshake that authenticates every connection
//! - Connections and path-tagged streams

pub mod addr;
pub mod carrier;
pub mod conn;
pub mod handshake;
pub mod id;
pub mod path;
pub mod stream;
pub mod transport;

pub use addr::{Addr, AddrParseError};
pub use carrier::inproc::InprocCarrier;
pub use carrier::quic::QuicCarrier;
pub use carrier::{Carrier, CLOSE_DUPLICATE, CLOSE_HANDSHAKE_FAILED, CLOSE_NORMAL};
pub use conn::Connection;
pub use handshake::{HandshakeError, HANDSHAKE_TIMEOUT};
pub use id::{IdGenerator, PeerId, RandomIds, SequentialIds};
pub use path::{read_path, write_path, PathError};
pub use stream::Stream;
pub use transport::{Incoming, Listener, Stage, Transport, TransportError};
