//! End-to-end tests against the in-memory knowledge server.
//!
//! Every session gets its own server task over a `tokio::io::duplex` pipe,
//! while all sessions of one test share a single store, the way scenarios
//! share one live backend.

mod client;
mod runner;
mod scenarios;

use crate::{
    Client, Connector, Endpoint, Error, Result, Settings,
    scenario::{Scenario, ScenarioReport, run_scenario},
};
use kb_fake_server::{Options, Store};
use std::{sync::Arc, time::Duration};

/// Hands out sessions against one shared store.
#[derive(Clone)]
pub struct FakeBackend {
    store: Arc<Store>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            store: Arc::new(Store::new(options)),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// An initialized client session.
    pub async fn client(&self) -> Client {
        let mut client = Client::new(self.endpoint().unwrap(), Duration::from_secs(5));
        client.initialize().await.unwrap();
        client
    }

    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        run_scenario(scenario, self, &settings()).await
    }
}

impl Connector for FakeBackend {
    fn endpoint(&self) -> Result<Endpoint> {
        Ok(Endpoint::Duplex(kb_fake_server::serve_duplex(
            self.store.clone(),
        )))
    }
}

/// A connector whose server can never be reached.
pub struct Unreachable;

impl Connector for Unreachable {
    fn endpoint(&self) -> Result<Endpoint> {
        Err(Error::Connection("connection refused".into()))
    }
}

pub fn settings() -> Settings {
    Settings {
        tag_prefix: "kb-conformance-test".to_string(),
        call_timeout: Duration::from_secs(5),
        deduplicate_jobs: false,
    }
}
