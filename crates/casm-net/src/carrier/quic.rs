//! QUIC carrier
//!
//! Each listener presents a freshly generated self-signed certificate and
//! dialers accept any certificate: peer identity is established by the
//! handshake that runs over the connection, not by TLS.

use super::{Carrier, RawConn, RawListener, RawStream};
use crate::addr::Addr;
use async_trait::async_trait;
use parking_lot::Mutex;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Endpoint, ServerConfig, TransportConfig, VarInt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Network tag for QUIC addresses
pub const NETWORK: &str = "quic";

/// ALPN identifier negotiated on every connection
pub const ALPN: &[u8] = b"casm/1";

/// Server name presented by dialers; certificates are not checked against it
const SERVER_NAME: &str = "casm";

const KEEP_ALIVE: Duration = Duration::from_secs(10);

/// QUIC set-up errors
#[derive(Debug, Error)]
pub enum QuicSetupError {
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("TLS configuration failed: {0}")]
    Tls(#[from] rustls::Error),
    #[error("QUIC crypto configuration failed: {0}")]
    Crypto(String),
}

/// QUIC carrier
#[derive(Clone)]
pub struct QuicCarrier {
    server: ServerConfig,
    client: ClientConfig,
}

impl QuicCarrier {
    /// Create a carrier with a new self-signed certificate
    pub fn new() -> Result<Self, QuicSetupError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])?;
        let cert_der = cert.cert.der().clone();
        let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let mut server_tls = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key.into())?;
        server_tls.alpn_protocols = vec![ALPN.to_vec()];

        let server_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(server_tls)
            .map_err(|e| QuicSetupError::Crypto(e.to_string()))?;
        let mut server = ServerConfig::with_crypto(Arc::new(server_crypto));
        server.transport_config(transport_config());

        let client = client_config(provider, ALPN)?;

        Ok(Self { server, client })
    }
}

fn client_config(
    provider: Arc<CryptoProvider>,
    alpn: &[u8],
) -> Result<ClientConfig, QuicSetupError> {
    let mut client_tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth();
    client_tls.alpn_protocols = vec![alpn.to_vec()];

    let client_crypto = QuicClientConfig::try_from(client_tls)
        .map_err(|e| QuicSetupError::Crypto(e.to_string()))?;
    let mut client = ClientConfig::new(Arc::new(client_crypto));
    client.transport_config(transport_config());
    Ok(client)
}

fn transport_config() -> Arc<TransportConfig> {
    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(Some(KEEP_ALIVE));
    Arc::new(transport)
}

fn parse_socket_addr(addr: &Addr) -> io::Result<SocketAddr> {
    addr.address().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a socket address: {:?}", addr.address()),
        )
    })
}

fn quic_error(kind: io::ErrorKind, err: impl std::fmt::Display) -> io::Error {
    io::Error::new(kind, err.to_string())
}

#[async_trait]
impl Carrier for QuicCarrier {
    async fn dial(&self, addr: &Addr) -> io::Result<Box<dyn RawConn>> {
        let remote = parse_socket_addr(addr)?;
        let bind = if remote.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };

        let mut endpoint = Endpoint::client(bind)?;
        endpoint.set_default_client_config(self.client.clone());

        let conn = endpoint
            .connect(remote, SERVER_NAME)
            .map_err(|e| quic_error(io::ErrorKind::InvalidInput, e))?
            .await
            .map_err(|e| quic_error(io::ErrorKind::ConnectionRefused, e))?;

        debug!(%remote, "quic connection established");
        Ok(Box::new(QuicConn::established(conn, endpoint)))
    }

    async fn listen(&self, addr: &Addr) -> io::Result<Box<dyn RawListener>> {
        let bind = parse_socket_addr(addr)?;
        let endpoint = Endpoint::server(self.server.clone(), bind)?;
        Ok(Box::new(QuicListener { endpoint }))
    }
}

/// Bound QUIC endpoint
pub struct QuicListener {
    endpoint: Endpoint,
}

#[async_trait]
impl RawListener for QuicListener {
    /// Returns as soon as a client's first packet arrives. The TLS handshake
    /// runs on first use of the connection, so a stalled client holds up
    /// only its own negotiation and not the accept loop.
    async fn accept(&self) -> io::Result<Box<dyn RawConn>> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint closed"))?;

        Ok(Box::new(QuicConn::incoming(incoming)))
    }

    fn local_address(&self) -> String {
        match self.endpoint.local_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => String::new(),
        }
    }

    fn close(&self) {
        self.endpoint.close(VarInt::from_u32(0), b"listener closed");
    }
}

/// One QUIC connection
///
/// Accepted connections start out pending and finish their TLS handshake
/// on first use.
pub struct QuicConn {
    conn: OnceCell<quinn::Connection>,
    pending: Mutex<Option<quinn::Incoming>>,
    /// Cancelled by [`RawConn::close`], including before set-up finished
    shut: CancellationToken,
    /// Client endpoints live exactly as long as their single connection
    _endpoint: Option<Endpoint>,
}

impl QuicConn {
    fn established(conn: quinn::Connection, endpoint: Endpoint) -> Self {
        Self {
            conn: OnceCell::from(conn),
            pending: Mutex::new(None),
            shut: CancellationToken::new(),
            _endpoint: Some(endpoint),
        }
    }

    fn incoming(incoming: quinn::Incoming) -> Self {
        Self {
            conn: OnceCell::new(),
            pending: Mutex::new(Some(incoming)),
            shut: CancellationToken::new(),
            _endpoint: None,
        }
    }

    /// Finish connection set-up once; later callers share the result
    async fn connection(&self) -> io::Result<&quinn::Connection> {
        self.conn
            .get_or_try_init(|| async {
                let incoming = self.pending.lock().take().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::ConnectionAborted, "connection set-up failed")
                })?;
                let connecting = incoming
                    .accept()
                    .map_err(|e| quic_error(io::ErrorKind::ConnectionAborted, e))?;
                let conn = tokio::select! {
                    _ = self.shut.cancelled() => {
                        return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "closed"));
                    }
                    res = connecting => res,
                };
                let conn = conn.map_err(|e| quic_error(io::ErrorKind::ConnectionAborted, e))?;
                debug!(remote = %conn.remote_address(), "quic connection established");
                Ok(conn)
            })
            .await
    }
}

#[async_trait]
impl RawConn for QuicConn {
    async fn open_stream(&self) -> io::Result<Box<dyn RawStream>> {
        let (send, recv) = self
            .connection()
            .await?
            .open_bi()
            .await
            .map_err(|e| quic_error(io::ErrorKind::ConnectionAborted, e))?;
        Ok(Box::new(QuicStream { send, recv }))
    }

    async fn accept_stream(&self) -> io::Result<Box<dyn RawStream>> {
        let (send, recv) = self
            .connection()
            .await?
            .accept_bi()
            .await
            .map_err(|e| quic_error(io::ErrorKind::ConnectionAborted, e))?;
        Ok(Box::new(QuicStream { send, recv }))
    }

    fn close(&self, code: u32, reason: &str) {
        self.shut.cancel();
        if let Some(conn) = self.conn.get() {
            conn.close(VarInt::from_u32(code), reason.as_bytes());
        } else if let Some(incoming) = self.pending.lock().take() {
            incoming.refuse();
        }
    }

    async fn closed(&self) {
        let lost = async {
            if let Ok(conn) = self.connection().await {
                let reason = conn.closed().await;
                debug!(%reason, "quic connection closed");
            }
        };
        tokio::select! {
            _ = self.shut.cancelled() => {}
            _ = lost => {}
        }
    }
}

/// A bidirectional QUIC stream
pub struct QuicStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

impl RawStream for QuicStream {
    fn reset(mut self: Box<Self>, code: u32) {
        let code = VarInt::from_u32(code);
        let _ = self.send.reset(code);
        let _ = self.recv.stop(code);
    }
}

/// Certificate verifier that accepts any server certificate while still
/// checking handshake signatures
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::CLOSE_NORMAL;
    use crate::id::PeerId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_rejects_non_socket_address() {
        let carrier = QuicCarrier::new().unwrap();
        let addr = Addr::new(PeerId(1), NETWORK, "casm", "/not/a/socket");
        let err = carrier.dial(&addr).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_loopback_stream() {
        let carrier = QuicCarrier::new().unwrap();
        let listener = carrier
            .listen(&Addr::new(PeerId(1), NETWORK, "casm", "127.0.0.1:0"))
            .await
            .unwrap();
        let bound = Addr::new(PeerId(1), NETWORK, "casm", listener.local_address());

        let accept = tokio::spawn(async move {
            let conn = listener.accept().await.unwrap();
            let mut stream = conn.accept_stream().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
            stream.shutdown().await.unwrap();
            conn.closed().await;
        });

        let conn = carrier.dial(&bound).await.unwrap();
        let mut stream = conn.open_stream().await.unwrap();
        stream.write_all(b"hello").await.unwrap();

        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"hello");

        conn.close(0, "done");
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_returns_before_tls_completes() {
        let carrier = QuicCarrier::new().unwrap();
        let listener = carrier
            .listen(&Addr::new(PeerId(1), NETWORK, "casm", "127.0.0.1:0"))
            .await
            .unwrap();
        let bound: SocketAddr = listener.local_address().parse().unwrap();

        // a client whose TLS set-up can never succeed
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut endpoint = Endpoint::client(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        endpoint.set_default_client_config(client_config(provider, b"other/1").unwrap());
        let connecting = endpoint.connect(bound, SERVER_NAME).unwrap();
        let client = tokio::spawn(async move { connecting.await.is_err() });

        let conn = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("accept waited on TLS")
            .unwrap();
        assert!(conn.accept_stream().await.is_err());
        conn.closed().await;
        assert!(client.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_before_set_up() {
        let carrier = QuicCarrier::new().unwrap();
        let listener = carrier
            .listen(&Addr::new(PeerId(1), NETWORK, "casm", "127.0.0.1:0"))
            .await
            .unwrap();
        let bound = Addr::new(PeerId(1), NETWORK, "casm", listener.local_address());

        let dialer = carrier.clone();
        let client = tokio::spawn(async move { dialer.dial(&bound).await.is_err() });

        let conn = listener.accept().await.unwrap();
        conn.close(CLOSE_NORMAL, "not now");
        conn.closed().await;
        assert!(conn.open_stream().await.is_err());
        assert!(client.await.unwrap());
    }
}
