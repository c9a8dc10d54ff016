//! In-process carrier
//!
//! Listeners are named entries in a registry shared by every clone of an
//! [`InprocCarrier`]; streams are in-memory duplex pipes. Both ends of a
//! connection share one cancellation token, so closing or dropping either
//! end closes the connection and fails I/O on its open streams.

use super::{Carrier, RawConn, RawListener, RawStream};
use crate::addr::Addr;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::trace;

/// Network tag for in-process addresses
pub const NETWORK: &str = "inproc";

/// Per-direction buffer of each stream pipe
const STREAM_BUFFER: usize = 64 * 1024;

type Registry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<InprocConn>>>>;

/// In-process carrier; clones share one address space
#[derive(Clone, Default)]
pub struct InprocCarrier {
    listeners: Registry,
}

impl InprocCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

#[async_trait]
impl Carrier for InprocCarrier {
    async fn dial(&self, addr: &Addr) -> io::Result<Box<dyn RawConn>> {
        let refused = || {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no listener at {:?}", addr.address()),
            )
        };

        let tx = self
            .listeners
            .lock()
            .get(addr.address())
            .cloned()
            .ok_or_else(refused)?;

        let (near, far) = InprocConn::pair();
        tx.send(far).map_err(|_| refused())?;
        Ok(Box::new(near))
    }

    async fn listen(&self, addr: &Addr) -> io::Result<Box<dyn RawListener>> {
        let address = addr.address().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        match self.listeners.lock().entry(address.clone()) {
            Entry::Occupied(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{:?} already bound", address),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        Ok(Box::new(InprocListener {
            address,
            incoming: tokio::sync::Mutex::new(rx),
            registry: self.listeners.clone(),
            closed: CancellationToken::new(),
        }))
    }
}

/// Bound in-process listener
pub struct InprocListener {
    address: String,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<InprocConn>>,
    registry: Registry,
    closed: CancellationToken,
}

#[async_trait]
impl RawListener for InprocListener {
    async fn accept(&self) -> io::Result<Box<dyn RawConn>> {
        let gone = || io::Error::new(io::ErrorKind::NotConnected, "listener closed");

        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(gone()),
            conn = incoming.recv() => match conn {
                Some(conn) => Ok(Box::new(conn) as Box<dyn RawConn>),
                None => Err(gone()),
            },
        }
    }

    fn local_address(&self) -> String {
        self.address.clone()
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.registry.lock().remove(&self.address);
        trace!(address = %self.address, "inproc listener closed");
    }
}

impl Drop for InprocListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// One end of an in-process connection
pub struct InprocConn {
    outbound: mpsc::UnboundedSender<DuplexStream>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    closed: CancellationToken,
}

impl InprocConn {
    /// Two connected ends
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let near = Self {
            outbound: a_tx,
            inbound: tokio::sync::Mutex::new(b_rx),
            closed: closed.clone(),
        };
        let far = Self {
            outbound: b_tx,
            inbound: tokio::sync::Mutex::new(a_rx),
            closed,
        };
        (near, far)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

#[async_trait]
impl RawConn for InprocConn {
    async fn open_stream(&self) -> io::Result<Box<dyn RawStream>> {
        if self.closed.is_cancelled() {
            return Err(aborted());
        }

        let (near, far) = tokio::io::duplex(STREAM_BUFFER);
        self.outbound.send(far).map_err(|_| aborted())?;
        Ok(Box::new(InprocStream::new(near, &self.closed)))
    }

    async fn accept_stream(&self) -> io::Result<Box<dyn RawStream>> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(aborted()),
            stream = inbound.recv() => match stream {
                Some(io) => Ok(Box::new(InprocStream::new(io, &self.closed)) as Box<dyn RawStream>),
                None => Err(aborted()),
            },
        }
    }

    fn close(&self, code: u32, reason: &str) {
        trace!(code, reason, "inproc connection closed");
        self.closed.cancel();
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl Drop for InprocConn {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// In-memory stream that fails once its connection closes
pub struct InprocStream {
    io: DuplexStream,
    conn: CancellationToken,
    conn_closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl InprocStream {
    fn new(io: DuplexStream, conn: &CancellationToken) -> Self {
        Self {
            io,
            conn: conn.clone(),
            conn_closed: Box::pin(conn.clone().cancelled_owned()),
        }
    }

    /// Registers a wakeup for connection closure; true once it happened
    fn poll_conn_closed(&mut self, cx: &mut Context<'_>) -> bool {
        self.conn.is_cancelled() || self.conn_closed.as_mut().poll(cx).is_ready()
    }
}

fn reset() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "connection closed")
}

impl AsyncRead for InprocStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.poll_conn_closed(cx) {
            return Poll::Ready(Err(reset()));
        }
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for InprocStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.poll_conn_closed(cx) {
            return Poll::Ready(Err(reset()));
        }
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl RawStream for InprocStream {
    fn reset(self: Box<Self>, code: u32) {
        // Dropping the pipe is all the reset an in-memory stream can signal
        trace!(code, "inproc stream reset");
    }
}
