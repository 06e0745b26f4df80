//! Scenario-driven conformance testing for MCP knowledge-base servers.

pub mod check;
pub mod client;
mod config;
mod error;
pub mod id;
pub mod ledger;
pub mod outcome;
pub mod runner;
pub mod scenario;
pub mod scenarios;
#[cfg(test)]
mod tests;

pub use client::{Client, Endpoint, Invoke, SessionState};
pub use config::{API_KEY_VAR, Config, ServerTarget};
pub use error::{Error, Result};
pub use outcome::{ErrorCategory, Failure, Outcome};
pub use runner::{Coordinator, IsolatedRunner, RunSummary};
pub use scenario::{Connector, Registry, Scenario, ScenarioContext, ScenarioReport, Settings};
