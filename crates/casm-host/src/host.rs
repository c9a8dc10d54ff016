//! Host orchestrator

use crate::config::HostConfig;
use crate::error::HostError;
use crate::mux::Mux;
use crate::network::{self, Network};
use crate::peers::PeerTable;
use crate::streams::StreamManager;
use casm_net::carrier::Carrier;
use casm_net::{Addr, IdGenerator, Listener, Transport, TransportError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by the host and its capabilities
pub(crate) struct Shared {
    pub(crate) addr: Addr,
    /// Root scope; every connection's scope descends from it
    pub(crate) root: CancellationToken,
    pub(crate) transport: Transport,
    pub(crate) peers: PeerTable,
    pub(crate) mux: Mux,
}

/// A peer in the overlay
pub struct Host {
    shared: Arc<Shared>,
}

impl Host {
    /// Create a host with a fresh identity. Nothing is bound until
    /// [`Host::listen_and_serve`].
    pub fn new(
        scope: &CancellationToken,
        carrier: Arc<dyn Carrier>,
        ids: &dyn IdGenerator,
        config: HostConfig,
    ) -> Self {
        let addr = Addr::new(
            ids.next_id(),
            config.network,
            config.protocol,
            config.address,
        );
        let transport = Transport::new(carrier).with_handshake_timeout(config.handshake_timeout);

        Self {
            shared: Arc::new(Shared {
                addr,
                root: scope.child_token(),
                transport,
                peers: PeerTable::new(),
                mux: Mux::new(),
            }),
        }
    }

    pub fn addr(&self) -> &Addr {
        &self.shared.addr
    }

    /// Root scope of the host
    pub fn scope(&self) -> &CancellationToken {
        &self.shared.root
    }

    pub fn network(&self) -> Network {
        Network::new(self.shared.clone())
    }

    pub fn streams(&self) -> StreamManager {
        StreamManager::new(self.shared.clone())
    }

    pub fn peers(&self) -> &PeerTable {
        &self.shared.peers
    }

    /// Cancel the root scope: stops accepting and closes every connection
    pub fn shutdown(&self) {
        info!(local_peer = %self.shared.addr.id(), "shutting down host");
        self.shared.root.cancel();
    }

    /// Bind [`Host::addr`] and accept connections in the background until
    /// `scope` or the host's root scope is cancelled
    ///
    /// The carrier must bind exactly the configured address, since that is
    /// what the host announces to dialed peers. Ephemeral addresses such as
    /// port 0 are refused with [`HostError::AddressMismatch`].
    pub async fn listen_and_serve(&self, scope: &CancellationToken) -> Result<(), HostError> {
        let shared = self.shared.clone();
        let listener = shared
            .transport
            .listen(&shared.root, &shared.addr)
            .await
            .map_err(HostError::Listen)?;

        if listener.addr().address() != shared.addr.address() {
            let err = HostError::AddressMismatch {
                configured: shared.addr.address().to_string(),
                bound: listener.addr().address().to_string(),
            };
            listener.close();
            return Err(err);
        }

        info!(
            local_peer = %shared.addr.id(),
            address = %listener.addr().address(),
            "started host"
        );
        tokio::spawn(accept_loop(shared, listener, scope.clone()));
        Ok(())
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: Listener, scope: CancellationToken) {
    loop {
        let incoming = tokio::select! {
            _ = scope.cancelled() => break,
            res = listener.accept_incoming(&shared.root) => match res {
                Ok(incoming) => incoming,
                Err(TransportError::Cancelled) => break,
                Err(e) if e.is_listener_closed() => break,
                Err(e) => {
                    warn!(
                        local_peer = %shared.addr.id(),
                        error = %e,
                        "failed to accept connection"
                    );
                    continue;
                }
            },
        };

        let shared = shared.clone();
        tokio::spawn(async move {
            if let Ok(conn) = incoming.negotiate().await {
                network::admit(&shared, conn);
            }
        });
    }

    listener.close();
    // Only the root scope owns the connections; a listen scope does not
    if shared.root.is_cancelled() {
        shared.peers.reset();
    }
    debug!(local_peer = %shared.addr.id(), "stopped accepting");
}
