//! Stream multiplexer
//!
//! Routes inbound streams to handlers by exact path match.

use async_trait::async_trait;
use casm_net::{Stream, CLOSE_NORMAL};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Responds to inbound streams
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn serve(&self, stream: Stream);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn serve(&self, stream: Stream) {
        (self)(stream).await
    }
}

/// Path-keyed handler registry
#[derive(Default)]
pub struct Mux {
    routes: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` at `path`, replacing any previous one
    pub fn register(&self, path: impl Into<String>, handler: impl Handler) {
        let path = path.into();
        debug!(%path, "registered handler");
        self.routes.write().insert(path, Arc::new(handler));
    }

    pub fn unregister(&self, path: &str) {
        if self.routes.write().remove(path).is_some() {
            debug!(path, "unregistered handler");
        }
    }

    /// Hand `stream` to the handler for its path on a new task.
    ///
    /// Returns false, after resetting the stream, when no handler matches.
    pub fn serve(&self, stream: Stream) -> bool {
        let handler = self.routes.read().get(stream.path()).cloned();

        match handler {
            Some(handler) => {
                let span = tracing::debug_span!("handler", path = %stream.path());
                tokio::spawn(async move { handler.serve(stream).await }.instrument(span));
                true
            }
            None => {
                debug!(path = %stream.path(), "no handler for path");
                stream.reset(CLOSE_NORMAL);
                false
            }
        }
    }

    /// Registered paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.routes.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}
