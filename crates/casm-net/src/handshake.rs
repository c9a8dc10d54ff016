//! Connection handshake
//!
//! Runs on the first carrier stream of a fresh connection. The exchange is
//! asymmetric: the dialer announces its full address so the listener learns
//! how to dial back, while the listener only answers with its peer id so the
//! dialer can check it reached the host it meant to reach.
//!
//! Wire format, dialer to listener:
//! - 8 bytes: peer id (big-endian)
//! - 1 byte + N bytes: network tag
//! - 1 byte + N bytes: protocol tag
//! - 1 byte + N bytes: address
//!
//! Listener to dialer:
//! - 8 bytes: peer id (big-endian)

use crate::addr::Addr;
use crate::id::PeerId;
use bytes::{Buf, BufMut, BytesMut};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

/// Default bound on a whole handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest network tag, protocol tag or address
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

const ID_LEN: usize = 8;

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed header: {field}")]
    Malformed { field: &'static str },
    #[error("{field} too long: {len} bytes (max {MAX_FIELD_LEN})")]
    FieldTooLong { field: &'static str, len: usize },
    #[error("handshake deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("identity mismatch: expected {expected}, reached {actual}")]
    IdentityMismatch { expected: PeerId, actual: PeerId },
    #[error("dialer announced the listener's own id {0}")]
    SelfAnnounced(PeerId),
}

/// Codec for the dialer's self-announcement
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnouncementCodec;

impl AnnouncementCodec {
    /// Name of the first field `src` does not fully contain
    fn missing_field(src: &[u8]) -> &'static str {
        const FIELDS: [&str; 3] = ["network tag", "protocol tag", "address"];

        if src.len() < ID_LEN {
            return "peer id";
        }
        let mut offset = ID_LEN;
        for field in FIELDS {
            match src.get(offset) {
                Some(&len) if src.len() >= offset + 1 + len as usize => {
                    offset += 1 + len as usize;
                }
                _ => return field,
            }
        }
        "trailing bytes"
    }
}

impl Encoder<&Addr> for AnnouncementCodec {
    type Error = HandshakeError;

    fn encode(&mut self, addr: &Addr, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let fields = [
            ("network tag", addr.network()),
            ("protocol tag", addr.protocol()),
            ("address", addr.address()),
        ];
        for (field, value) in fields {
            if value.len() > MAX_FIELD_LEN {
                return Err(HandshakeError::FieldTooLong {
                    field,
                    len: value.len(),
                });
            }
        }

        dst.put_slice(&addr.id().to_be_bytes());
        for (_, value) in fields {
            dst.put_u8(value.len() as u8);
            dst.put_slice(value.as_bytes());
        }
        Ok(())
    }
}

impl Decoder for AnnouncementCodec {
    type Item = Addr;
    type Error = HandshakeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the whole header before consuming anything
        if Self::missing_field(src) != "trailing bytes" {
            return Ok(None);
        }

        let id = PeerId(src.get_u64());
        let network = take_field(src, "network tag")?;
        let protocol = take_field(src, "protocol tag")?;
        let address = take_field(src, "address")?;

        Ok(Some(Addr::new(id, network, protocol, address)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(addr) => Ok(Some(addr)),
            None => Err(HandshakeError::Malformed {
                field: Self::missing_field(src),
            }),
        }
    }
}

fn take_field(src: &mut BytesMut, field: &'static str) -> Result<String, HandshakeError> {
    let len = src.get_u8() as usize;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| HandshakeError::Malformed { field })
}

/// Read one announcement; the dialer finishes its side after sending
async fn read_announcement<R>(r: &mut R) -> Result<Addr, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut codec = AnnouncementCodec;
    let mut buf = BytesMut::with_capacity(ID_LEN + 3 * (1 + 32));

    loop {
        if let Some(addr) = codec.decode(&mut buf)? {
            return Ok(addr);
        }
        if r.read_buf(&mut buf).await? == 0 {
            // decode_eof never yields Ok(None)
            return codec.decode_eof(&mut buf)?.ok_or(HandshakeError::Malformed {
                field: "peer id",
            });
        }
    }
}

async fn read_peer_id<R>(r: &mut R) -> Result<PeerId, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    match r.read_u64().await {
        Ok(raw) => Ok(PeerId(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(HandshakeError::Malformed { field: "peer id" })
        }
        Err(e) => Err(e.into()),
    }
}

async fn send_and_finish<W>(w: &mut W, bytes: &[u8]) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(bytes).await?;
    w.shutdown().await?;
    Ok(())
}

async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, HandshakeError>
where
    F: std::future::Future<Output = Result<T, HandshakeError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| HandshakeError::DeadlineExceeded(timeout))?
}

/// Dial side: announce `local`, then check the listener is `expected`.
///
/// Returns the address of the remote host, which is `expected` itself.
pub async fn dial<S>(
    io: S,
    local: &Addr,
    expected: &Addr,
    timeout: Duration,
) -> Result<Addr, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = BytesMut::new();
    AnnouncementCodec.encode(local, &mut header)?;

    let (mut rd, mut wr) = tokio::io::split(io);
    let (_, actual) = with_deadline(timeout, async {
        tokio::try_join!(send_and_finish(&mut wr, &header), read_peer_id(&mut rd))
    })
    .await?;

    if actual != expected.id() {
        return Err(HandshakeError::IdentityMismatch {
            expected: expected.id(),
            actual,
        });
    }
    Ok(expected.clone())
}

/// Listen side: answer with our id and learn the dialer's address
pub async fn listen<S>(io: S, local: &Addr, timeout: Duration) -> Result<Addr, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = local.id().to_be_bytes();

    let (mut rd, mut wr) = tokio::io::split(io);
    let (_, remote) = with_deadline(timeout, async {
        tokio::try_join!(send_and_finish(&mut wr, &id), read_announcement(&mut rd))
    })
    .await?;

    if remote.id() == local.id() {
        return Err(HandshakeError::SelfAnnounced(remote.id()));
    }
    Ok(remote)
}
