//! Negotiated connections
//!
//! A [`Connection`] only exists once the handshake completed. Its scope and
//! its carrier connection share one lifetime: a watcher task cancels the
//! scope when the carrier reports closure and closes the carrier when the
//! scope is cancelled.

use crate::addr::Addr;
use crate::carrier::{RawConn, CLOSE_NORMAL};
use crate::stream::Stream;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A multiplexed link to exactly one remote peer
pub struct Connection {
    raw: Arc<dyn RawConn>,
    local: Addr,
    remote: Addr,
    scope: CancellationToken,
}

impl Connection {
    /// Wrap a negotiated carrier connection. Must be called from within a
    /// tokio runtime.
    pub(crate) fn new(
        raw: Box<dyn RawConn>,
        local: Addr,
        remote: Addr,
        parent: &CancellationToken,
    ) -> Self {
        let raw: Arc<dyn RawConn> = Arc::from(raw);
        let scope = parent.child_token();

        tokio::spawn(watch(raw.clone(), scope.clone(), remote.clone()));

        Self {
            raw,
            local,
            remote,
            scope,
        }
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    pub fn remote_addr(&self) -> &Addr {
        &self.remote
    }

    /// Cancelled exactly when the connection closes
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Open an outbound stream. The path header is not written here.
    pub async fn open_stream(&self) -> io::Result<Stream> {
        let raw = tokio::select! {
            _ = self.scope.cancelled() => return Err(closed()),
            raw = self.raw.open_stream() => raw?,
        };
        Ok(Stream::new(raw, self.local.clone(), self.remote.clone(), ""))
    }

    /// Wait for the next inbound stream. Its path header is not read here.
    pub async fn accept_stream(&self) -> io::Result<Stream> {
        let raw = tokio::select! {
            _ = self.scope.cancelled() => return Err(closed()),
            raw = self.raw.accept_stream() => raw?,
        };
        Ok(Stream::new(raw, self.local.clone(), self.remote.clone(), ""))
    }

    /// Close the carrier connection with `code` and end the scope
    pub fn close(&self, code: u32, reason: &str) {
        self.raw.close(code, reason);
        self.scope.cancel();
    }

    /// Resolves once the connection is closed, from either side
    pub async fn closed(&self) {
        self.scope.cancelled().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

async fn watch(raw: Arc<dyn RawConn>, scope: CancellationToken, remote: Addr) {
    tokio::select! {
        _ = scope.cancelled() => {
            raw.close(CLOSE_NORMAL, "scope cancelled");
            debug!(remote_peer = %remote.id(), "connection scope ended");
        }
        _ = raw.closed() => {
            scope.cancel();
            debug!(remote_peer = %remote.id(), "carrier connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::inproc::InprocConn;
    use crate::id::PeerId;
    use std::time::Duration;

    fn conn(raw: InprocConn, parent: &CancellationToken) -> Connection {
        Connection::new(
            Box::new(raw),
            Addr::new(PeerId(1), "inproc", "casm", "/a"),
            Addr::new(PeerId(2), "inproc", "casm", "/b"),
            parent,
        )
    }

    async fn settles(conn: &Connection) {
        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .expect("connection did not close");
    }

    #[tokio::test]
    async fn test_carrier_close_cancels_scope() {
        let root = CancellationToken::new();
        let (near, far) = InprocConn::pair();
        let c = conn(near, &root);

        far.close(CLOSE_NORMAL, "bye");
        settles(&c).await;
        assert!(!root.is_cancelled());
        assert!(c.accept_stream().await.is_err());
    }

    #[tokio::test]
    async fn test_parent_cancel_closes_carrier() {
        let root = CancellationToken::new();
        let (near, far) = InprocConn::pair();
        let c = conn(near, &root);

        root.cancel();
        settles(&c).await;
        tokio::time::timeout(Duration::from_secs(1), far.closed())
            .await
            .expect("carrier stayed open");
    }

    #[tokio::test]
    async fn test_close_is_observed() {
        let root = CancellationToken::new();
        let (near, far) = InprocConn::pair();
        let c = conn(near, &root);

        c.close(CLOSE_NORMAL, "done");
        assert!(c.is_closed());
        assert!(c.open_stream().await.is_err());
        far.closed().await;
    }
}
