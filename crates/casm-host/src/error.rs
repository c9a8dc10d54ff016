use casm_net::{PathError, PeerId, TransportError};
use thiserror::Error;

/// Host errors
#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot connect to self")]
    SelfDial,
    #[error("peer already connected: {0}")]
    AlreadyConnected(PeerId),
    #[error("peer not connected: {0}")]
    PeerNotConnected(PeerId),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("open stream: {0}")]
    OpenStream(#[source] std::io::Error),
    #[error("write path: {0}")]
    WritePath(#[from] PathError),
    #[error("listen: {0}")]
    Listen(#[source] TransportError),
    #[error("listener bound {bound}, but the host announces {configured}")]
    AddressMismatch { configured: String, bound: String },
}
