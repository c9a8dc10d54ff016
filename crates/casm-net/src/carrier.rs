//! Carrier transports
//!
//! A carrier delivers bytes and multiplexes raw streams over one connection.
//! Identity and path semantics are layered on top by [`crate::transport`].

use crate::addr::Addr;
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod inproc;
pub mod quic;

/// Close code for an orderly close
pub const CLOSE_NORMAL: u32 = 0;
/// Close code sent when the handshake failed
pub const CLOSE_HANDSHAKE_FAILED: u32 = 1;
/// Close code sent to the loser of a duplicate-connection race
pub const CLOSE_DUPLICATE: u32 = 2;

/// A bidirectional carrier stream
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Abort both directions without a graceful finish
    fn reset(self: Box<Self>, code: u32);
}

/// A carrier connection able to open and accept raw streams
#[async_trait]
pub trait RawConn: Send + Sync {
    async fn open_stream(&self) -> io::Result<Box<dyn RawStream>>;

    async fn accept_stream(&self) -> io::Result<Box<dyn RawStream>>;

    /// Close the connection, telling the remote why if the carrier can
    fn close(&self, code: u32, reason: &str);

    /// Resolves once the connection is closed, by either side
    async fn closed(&self);
}

/// A bound carrier listener
#[async_trait]
pub trait RawListener: Send + Sync {
    /// Next inbound connection. A closed listener fails with
    /// [`io::ErrorKind::NotConnected`].
    async fn accept(&self) -> io::Result<Box<dyn RawConn>>;

    /// The carrier address actually bound
    fn local_address(&self) -> String;

    fn close(&self);
}

/// A pluggable carrier
#[async_trait]
pub trait Carrier: Send + Sync {
    async fn dial(&self, addr: &Addr) -> io::Result<Box<dyn RawConn>>;

    async fn listen(&self, addr: &Addr) -> io::Result<Box<dyn RawListener>>;
}

/// Whether an accept error means the listener is gone for good
pub fn is_listener_closed(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotConnected
}
