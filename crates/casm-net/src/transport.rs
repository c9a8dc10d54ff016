//! Transport facade
//!
//! Wraps a [`Carrier`] with the handshake, so every [`Connection`] handed
//! out has a verified remote identity.

use crate::addr::Addr;
use crate::carrier::{Carrier, RawConn, RawListener, CLOSE_HANDSHAKE_FAILED};
use crate::conn::Connection;
use crate::handshake::{self, HandshakeError, HANDSHAKE_TIMEOUT};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where a carrier error happened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Dial,
    Listen,
    Accept,
    Handshake,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Dial => "dial",
            Stage::Listen => "listen",
            Stage::Accept => "accept",
            Stage::Handshake => "handshake",
        })
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{stage}: {source}")]
    Carrier {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    fn carrier(stage: Stage) -> impl FnOnce(std::io::Error) -> Self {
        move |source| TransportError::Carrier { stage, source }
    }

    /// Whether this came from accepting on a listener that has been closed
    pub fn is_listener_closed(&self) -> bool {
        match self {
            TransportError::Carrier {
                stage: Stage::Accept,
                source,
            } => crate::carrier::is_listener_closed(source),
            _ => false,
        }
    }
}

/// Carrier plus handshake
#[derive(Clone)]
pub struct Transport {
    carrier: Arc<dyn Carrier>,
    handshake_timeout: Duration,
}

impl Transport {
    pub fn new(carrier: Arc<dyn Carrier>) -> Self {
        Self {
            carrier,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Bound on each handshake
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Dial `remote` and negotiate as `local`.
    ///
    /// The connection's scope is a child of `scope`.
    pub async fn dial(
        &self,
        scope: &CancellationToken,
        local: &Addr,
        remote: &Addr,
    ) -> Result<Connection, TransportError> {
        let raw = tokio::select! {
            _ = scope.cancelled() => return Err(TransportError::Cancelled),
            raw = self.carrier.dial(remote) => raw.map_err(TransportError::carrier(Stage::Dial))?,
        };

        let negotiated = tokio::select! {
            _ = scope.cancelled() => Err(TransportError::Cancelled),
            res = negotiate_dial(&*raw, local, remote, self.handshake_timeout) => res,
        };

        match negotiated {
            Ok(remote) => {
                debug!(local_peer = %local.id(), remote_peer = %remote.id(), "dialed");
                Ok(Connection::new(raw, local.clone(), remote, scope))
            }
            Err(e) => {
                raw.close(CLOSE_HANDSHAKE_FAILED, "handshake failed");
                Err(e)
            }
        }
    }

    /// Bind `local` on the carrier
    pub async fn listen(
        &self,
        scope: &CancellationToken,
        local: &Addr,
    ) -> Result<Listener, TransportError> {
        let raw = tokio::select! {
            _ = scope.cancelled() => return Err(TransportError::Cancelled),
            raw = self.carrier.listen(local) => {
                raw.map_err(TransportError::carrier(Stage::Listen))?
            }
        };

        let addr = Addr::new(
            local.id(),
            local.network(),
            local.protocol(),
            raw.local_address(),
        );
        debug!(local_peer = %local.id(), address = %addr.address(), "listening");

        Ok(Listener {
            raw,
            local: local.clone(),
            addr,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

/// A bound listener producing negotiated connections
pub struct Listener {
    raw: Box<dyn RawListener>,
    /// Announced in handshakes
    local: Addr,
    /// Actually bound
    addr: Addr,
    handshake_timeout: Duration,
}

impl Listener {
    /// The bound address, with the carrier's concrete location
    pub fn addr(&self) -> &Addr {
        &self.addr
    }

    /// Accept the next carrier connection without negotiating it
    pub async fn accept_incoming(
        &self,
        scope: &CancellationToken,
    ) -> Result<Incoming, TransportError> {
        let raw = tokio::select! {
            _ = scope.cancelled() => return Err(TransportError::Cancelled),
            raw = self.raw.accept() => raw.map_err(TransportError::carrier(Stage::Accept))?,
        };

        Ok(Incoming {
            raw,
            local: self.local.clone(),
            scope: scope.clone(),
            handshake_timeout: self.handshake_timeout,
        })
    }

    /// Accept and negotiate the next connection
    pub async fn accept(&self, scope: &CancellationToken) -> Result<Connection, TransportError> {
        self.accept_incoming(scope).await?.negotiate().await
    }

    pub fn close(&self) {
        self.raw.close();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.raw.close();
    }
}

/// An accepted carrier connection still waiting for its handshake
pub struct Incoming {
    raw: Box<dyn RawConn>,
    local: Addr,
    scope: CancellationToken,
    handshake_timeout: Duration,
}

impl Incoming {
    /// Run the listener side of the handshake
    pub async fn negotiate(self) -> Result<Connection, TransportError> {
        let negotiated = tokio::select! {
            _ = self.scope.cancelled() => Err(TransportError::Cancelled),
            res = negotiate_listen(&*self.raw, &self.local, self.handshake_timeout) => res,
        };

        match negotiated {
            Ok(remote) => {
                debug!(local_peer = %self.local.id(), remote_peer = %remote.id(), "accepted");
                Ok(Connection::new(self.raw, self.local, remote, &self.scope))
            }
            Err(e) => {
                warn!(local_peer = %self.local.id(), error = %e, "inbound handshake failed");
                self.raw.close(CLOSE_HANDSHAKE_FAILED, "handshake failed");
                Err(e)
            }
        }
    }
}

fn deadline_exceeded(timeout: Duration) -> TransportError {
    HandshakeError::DeadlineExceeded(timeout).into()
}

async fn negotiate_dial(
    raw: &dyn RawConn,
    local: &Addr,
    remote: &Addr,
    timeout: Duration,
) -> Result<Addr, TransportError> {
    let deadline = Instant::now() + timeout;

    let stream = tokio::time::timeout_at(deadline, raw.open_stream())
        .await
        .map_err(|_| deadline_exceeded(timeout))?
        .map_err(TransportError::carrier(Stage::Handshake))?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    Ok(handshake::dial(stream, local, remote, remaining).await?)
}

async fn negotiate_listen(
    raw: &dyn RawConn,
    local: &Addr,
    timeout: Duration,
) -> Result<Addr, TransportError> {
    let deadline = Instant::now() + timeout;

    let stream = tokio::time::timeout_at(deadline, raw.accept_stream())
        .await
        .map_err(|_| deadline_exceeded(timeout))?
        .map_err(TransportError::carrier(Stage::Handshake))?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    Ok(handshake::listen(stream, local, remaining).await?)
}
