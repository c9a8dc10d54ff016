//! casmd node - host set-up and main service loop

use crate::config::Config;
use casm_host::Host;
use casm_net::{QuicCarrier, RandomIds, Stream};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Path of the built-in echo service
pub const ECHO_PATH: &str = "/echo";

/// Start a QUIC host, dial the bootstrap peers and serve until `shutdown`
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let carrier = QuicCarrier::new()?;
    let host = Host::new(
        &shutdown,
        Arc::new(carrier),
        &RandomIds::new(),
        config.host_config(),
    );
    host.streams().register(ECHO_PATH, echo);

    host.listen_and_serve(host.scope()).await?;
    info!("Host {} ready", host.addr());

    for peer in &config.bootstrap {
        match host.network().connect(host.scope(), peer).await {
            Ok(()) => info!("Connected to bootstrap peer {}", peer),
            Err(e) => warn!("Failed to connect to bootstrap peer {}: {}", peer, e),
        }
    }

    host.scope().cancelled().await;
    host.shutdown();
    info!("Host {} stopped", host.addr().id());
    Ok(())
}

/// Write back everything read until the remote finishes
pub async fn echo(mut stream: Stream) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(remote_peer = %stream.remote_addr().id(), error = %e, "echo read failed");
                return;
            }
        };
        if let Err(e) = stream.write_all(&buf[..n]).await {
            debug!(remote_peer = %stream.remote_addr().id(), error = %e, "echo write failed");
            return;
        }
    }
    let _ = stream.close().await;
}
