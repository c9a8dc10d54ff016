//! Streams: path-tagged sub-channels of a connection

use crate::addr::Addr;
use crate::carrier::RawStream;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::{Instant, Sleep};

/// A bidirectional byte stream addressed to a path
///
/// Dropping a stream releases its carrier resources; [`Stream::close`]
/// finishes the write side gracefully first.
pub struct Stream {
    path: String,
    local: Addr,
    remote: Addr,
    raw: Box<dyn RawStream>,
    read_deadline: Deadline,
    write_deadline: Deadline,
}

impl Stream {
    pub fn new(
        raw: Box<dyn RawStream>,
        local: Addr,
        remote: Addr,
        path: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            local,
            remote,
            raw,
            read_deadline: Deadline::default(),
            write_deadline: Deadline::default(),
        }
    }

    /// Tag the stream once its path header has been written or read
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    pub fn remote_addr(&self) -> &Addr {
        &self.remote
    }

    /// Fail pending and future reads with `TimedOut` once `at` passes.
    /// `None` clears the deadline.
    pub fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
    }

    /// Fail pending and future writes with `TimedOut` once `at` passes
    pub fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline.set(at);
    }

    pub fn set_deadline(&mut self, at: Option<Instant>) {
        self.set_read_deadline(at);
        self.set_write_deadline(at);
    }

    /// Finish the write side and release the stream
    pub async fn close(mut self) -> io::Result<()> {
        self.shutdown().await
    }

    /// Abort the stream in both directions
    pub fn reset(self, code: u32) {
        self.raw.reset(code);
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("path", &self.path)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Deadline(Option<Pin<Box<Sleep>>>);

impl Deadline {
    fn set(&mut self, at: Option<Instant>) {
        self.0 = at.map(|at| Box::pin(tokio::time::sleep_until(at)));
    }

    fn poll_elapsed(&mut self, cx: &mut Context<'_>) -> bool {
        match self.0.as_mut() {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "stream deadline exceeded")
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_deadline.poll_elapsed(cx) {
            return Poll::Ready(Err(timed_out()));
        }
        Pin::new(&mut self.raw).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.write_deadline.poll_elapsed(cx) {
            return Poll::Ready(Err(timed_out()));
        }
        Pin::new(&mut self.raw).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.write_deadline.poll_elapsed(cx) {
            return Poll::Ready(Err(timed_out()));
        }
        Pin::new(&mut self.raw).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.write_deadline.poll_elapsed(cx) {
            return Poll::Ready(Err(timed_out()));
        }
        Pin::new(&mut self.raw).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::inproc::InprocConn;
    use crate::carrier::RawConn;
    use crate::id::PeerId;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn pair() -> (Stream, Stream) {
        let (near, far) = InprocConn::pair();
        let a = Addr::new(PeerId(1), "inproc", "casm", "/a");
        let b = Addr::new(PeerId(2), "inproc", "casm", "/b");

        let opened = near.open_stream().await.unwrap();
        let accepted = far.accept_stream().await.unwrap();

        // dropping either end would close the connection under the streams
        std::mem::forget(near);
        std::mem::forget(far);

        (
            Stream::new(opened, a.clone(), b.clone(), "/test"),
            Stream::new(accepted, b, a, "/test"),
        )
    }

    #[tokio::test]
    async fn test_accessors() {
        let (s, _) = pair().await;
        assert_eq!(s.path(), "/test");
        assert_eq!(s.local_addr().id(), PeerId(1));
        assert_eq!(s.remote_addr().id(), PeerId(2));
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (mut s, _peer) = pair().await;
        s.set_read_deadline(Some(Instant::now() + Duration::from_millis(20)));

        let mut buf = [0u8; 1];
        let err = s.read(&mut buf).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        s.set_read_deadline(None);
        let read = tokio::time::timeout(Duration::from_millis(20), s.read(&mut buf)).await;
        assert!(read.is_err(), "cleared deadline must not fire");
    }

    #[tokio::test]
    async fn test_write_deadline() {
        let (mut s, _peer) = pair().await;
        s.set_write_deadline(Some(Instant::now() + Duration::from_millis(20)));

        // larger than the pipe, and the peer never reads
        let err = s.write_all(&vec![0u8; 256 * 1024]).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_set_deadline_covers_both_directions() {
        let (mut s, mut peer) = pair().await;
        s.set_deadline(Some(Instant::now() - Duration::from_millis(10)));

        let mut buf = [0u8; 1];
        assert_eq!(s.read(&mut buf).await.err().unwrap().kind(), io::ErrorKind::TimedOut);
        assert_eq!(s.write(b"x").await.err().unwrap().kind(), io::ErrorKind::TimedOut);

        s.set_deadline(None);
        s.write_all(b"x").await.unwrap();
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");
    }

    #[tokio::test]
    async fn test_close_signals_eof() {
        let (s, mut peer) = pair().await;
        s.close().await.unwrap();

        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
