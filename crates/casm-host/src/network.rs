//! Network capability: dialing and dropping peers
//!
//! Also owns the per-connection worker that accepts inbound streams, reads
//! their path header and hands them to the mux.

use crate::error::HostError;
use crate::host::Shared;
use casm_net::{read_path, Addr, Connection, PeerId, Stream, TransportError};
use casm_net::{CLOSE_DUPLICATE, CLOSE_NORMAL};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

/// Connect to and disconnect from peers
#[derive(Clone)]
pub struct Network {
    shared: Arc<Shared>,
}

impl Network {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Dial `addr`, negotiate and add the connection to the peer table.
    ///
    /// `scope` bounds the attempt only; the connection itself lives until
    /// it is disconnected, closed by the remote, or the host shuts down.
    pub async fn connect(&self, scope: &CancellationToken, addr: &Addr) -> Result<(), HostError> {
        let shared = &self.shared;
        let id = addr.id();

        if id == shared.addr.id() {
            return Err(HostError::SelfDial);
        }
        if shared.peers.contains(id) {
            return Err(HostError::AlreadyConnected(id));
        }

        let conn = tokio::select! {
            _ = scope.cancelled() => return Err(TransportError::Cancelled.into()),
            conn = shared.transport.dial(&shared.root, &shared.addr, addr) => conn?,
        };

        let conn = Arc::new(conn);
        if !shared.peers.add(conn.clone()) {
            conn.close(CLOSE_DUPLICATE, "peer already connected");
            return Err(HostError::AlreadyConnected(id));
        }

        debug!(local_peer = %shared.addr.id(), remote_peer = %id, "connected to peer");
        spawn_worker(shared, conn);
        Ok(())
    }

    /// Drop and close the connection to `id`, if any
    pub fn disconnect(&self, id: PeerId) {
        if let Some(conn) = self.shared.peers.del(id) {
            conn.close(CLOSE_NORMAL, "disconnected");
            debug!(
                local_peer = %self.shared.addr.id(),
                remote_peer = %id,
                "disconnected from peer"
            );
        }
    }
}

/// Add an accepted connection, closing it if its peer is already present
pub(crate) fn admit(shared: &Arc<Shared>, conn: Connection) {
    let conn = Arc::new(conn);
    let remote = conn.remote_addr().id();

    if !shared.peers.add(conn.clone()) {
        warn!(local_peer = %shared.addr.id(), remote_peer = %remote, "peer already connected");
        conn.close(CLOSE_DUPLICATE, "peer already connected");
        return;
    }

    debug!(local_peer = %shared.addr.id(), remote_peer = %remote, "connection accepted");
    spawn_worker(shared, conn);
}

/// Serve inbound streams on `conn` until it closes, then drop it from the
/// peer table
pub(crate) fn spawn_worker(shared: &Arc<Shared>, conn: Arc<Connection>) {
    let span = tracing::debug_span!(
        "conn",
        local_peer = %shared.addr.id(),
        remote_peer = %conn.remote_addr().id(),
    );
    let shared = shared.clone();

    let worker = async move {
        loop {
            match conn.accept_stream().await {
                Ok(stream) => {
                    tokio::spawn(dispatch(shared.clone(), stream).in_current_span());
                }
                Err(e) => {
                    debug!(error = %e, "stopped accepting streams");
                    break;
                }
            }
        }

        if shared.peers.remove_conn(&conn) {
            debug!("peer removed");
        }
        conn.close(CLOSE_NORMAL, "connection ended");
    };

    tokio::spawn(worker.instrument(span));
}

async fn dispatch(shared: Arc<Shared>, mut stream: Stream) {
    match read_path(&mut stream).await {
        Ok(path) => {
            debug!(%path, "handling stream");
            shared.mux.serve(stream.with_path(path));
        }
        Err(e) => {
            warn!(error = %e, "failed to read stream path");
            stream.reset(CLOSE_NORMAL);
        }
    }
}
