//! A small in-memory knowledge base served over MCP.

mod error;
mod server;
pub mod store;

pub use error::{Error, Result};
pub use server::{JOB_TYPES, Server};
pub use store::{Deletion, Options, Store};

use rmcp::ServiceExt;
use std::sync::Arc;
use tokio::io::DuplexStream;

/// Starts a server on one end of an in-process pipe and returns the other.
///
/// The server task ends when the returned stream is dropped.
pub fn serve_duplex(store: Arc<Store>) -> DuplexStream {
    let (client, server) = tokio::io::duplex(1 << 17);
    tokio::spawn(async move {
        match Server::new(store).serve(server).await {
            Ok(service) => {
                if let Err(err) = service.waiting().await {
                    tracing::debug!(%err, "fake server stopped");
                }
            }
            Err(err) => tracing::warn!(%err, "fake server failed to start"),
        }
    });
    client
}
