//! Stream capability: handler registration and outbound streams

use crate::error::HostError;
use crate::host::Shared;
use crate::mux::Handler;
use casm_net::{write_path, Addr, Stream};
use std::sync::Arc;
use tracing::debug;

/// Register handlers and open streams to connected peers
#[derive(Clone)]
pub struct StreamManager {
    shared: Arc<Shared>,
}

impl StreamManager {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn register(&self, path: impl Into<String>, handler: impl Handler) {
        self.shared.mux.register(path, handler);
    }

    pub fn unregister(&self, path: &str) {
        self.shared.mux.unregister(path);
    }

    /// Registered paths
    pub fn paths(&self) -> Vec<String> {
        self.shared.mux.paths()
    }

    /// Open a stream to `addr` and route it to `path` on the remote.
    ///
    /// Never dials: the peer must already be connected.
    pub async fn open(&self, addr: &Addr, path: &str) -> Result<Stream, HostError> {
        let conn = self
            .shared
            .peers
            .get(addr.id())
            .ok_or(HostError::PeerNotConnected(addr.id()))?;

        let mut stream = conn.open_stream().await.map_err(HostError::OpenStream)?;
        write_path(&mut stream, path).await?;

        debug!(
            local_peer = %self.shared.addr.id(),
            remote_peer = %addr.id(),
            path,
            "stream opened"
        );
        Ok(stream.with_path(path))
    }
}
