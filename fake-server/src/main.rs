use kb_fake_server::{Options, Server, Store};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let options = Options {
        backups_configured: std::env::var_os("KB_FAKE_BACKUPS").is_some(),
        encryption_configured: std::env::var_os("KB_FAKE_NO_ENCRYPTION").is_none(),
        authenticated: std::env::var("KB_API_KEY").is_ok_and(|key| !key.trim().is_empty()),
    };
    tracing::info!(?options, "starting kb-fake-server");

    let store = Arc::new(Store::new(options));
    let service = Server::new(store).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
