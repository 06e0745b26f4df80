//! Scenarios: named groups of cases sharing one session and one ledger.

use crate::{
    Error, Failure, Result,
    check::id_of,
    client::{Client, Endpoint},
    id,
    ledger::{CleanupLedger, DrainReport, ResourceKind},
};
use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{any::Any, fmt, panic::AssertUnwindSafe, time::Duration, time::Instant};

/// A setup hook or test case.
pub type CaseFn = for<'a> fn(&'a mut ScenarioContext) -> BoxFuture<'a, Result<()>>;

/// Produces a fresh endpoint for every scenario session.
///
/// All sessions reach the same backing store; isolation between scenarios
/// comes from unique identifiers only.
pub trait Connector: Send + Sync {
    fn endpoint(&self) -> Result<Endpoint>;
}

/// Knobs scenarios can read.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tag_prefix: String,
    pub call_timeout: Duration,
    /// Whether jobs are queued with deduplication requested.
    pub deduplicate_jobs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tag_prefix: "mcp-conformance".to_string(),
            call_timeout: Duration::from_secs(30),
            deduplicate_jobs: false,
        }
    }
}

struct Case {
    name: &'static str,
    run: CaseFn,
}

pub struct Scenario {
    name: &'static str,
    description: &'static str,
    setup: Option<CaseFn>,
    cases: Vec<Case>,
}

impl Scenario {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            description: "",
            setup: None,
            cases: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn setup(mut self, hook: CaseFn) -> Self {
        self.setup = Some(hook);
        self
    }

    pub fn case(mut self, name: &'static str, run: CaseFn) -> Self {
        self.cases.push(Case { name, run });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn case_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cases.iter().map(|case| case.name)
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("cases", &self.cases.len())
            .finish()
    }
}

/// Scenarios in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    scenarios: Vec<Scenario>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.scenarios.iter().map(Scenario::name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Picks the named scenarios, keeping registration order. An empty
    /// filter selects everything.
    pub fn select(&self, names: &[String]) -> Result<Vec<&Scenario>> {
        for name in names {
            if self.get(name).is_none() {
                let hint = self
                    .names()
                    .into_iter()
                    .map(|known| (strsim::jaro_winkler(name, known), known))
                    .filter(|(score, _)| *score > 0.7)
                    .max_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(_, known)| format!(", did you mean `{known}`?"))
                    .unwrap_or_default();
                return Err(Error::InvalidConfig(format!(
                    "unknown scenario `{name}`{hint}"
                )));
            }
        }

        Ok(self
            .scenarios
            .iter()
            .filter(|s| names.is_empty() || names.iter().any(|n| n == s.name))
            .collect())
    }
}

/// Everything a case can touch: the session, the ledger and fixtures.
pub struct ScenarioContext {
    scenario: &'static str,
    client: Client,
    ledger: CleanupLedger,
    settings: Settings,
    tag: String,
    fixtures: Map<String, Value>,
}

impl ScenarioContext {
    pub fn new(scenario: &'static str, client: Client, settings: Settings) -> Self {
        let tag = id::test_tag(&settings.tag_prefix, None);
        Self {
            scenario,
            client,
            ledger: CleanupLedger::new(),
            settings,
            tag,
            fixtures: Map::new(),
        }
    }

    pub fn scenario(&self) -> &'static str {
        self.scenario
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn ledger(&self) -> &CleanupLedger {
        &self.ledger
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Tag carried by every record this scenario creates.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// A tag nested under this scenario's tag.
    pub fn sub_tag(&self, discriminator: &str) -> String {
        id::test_tag(&self.tag, Some(discriminator))
    }

    /// `base` with a random suffix, for names that must be unique.
    pub fn unique(&self, base: &str) -> String {
        format!("{base}-{}", id::short_id())
    }

    pub async fn call(&self, operation: &str, arguments: Value) -> Result<Value> {
        self.client.call(operation, arguments).await
    }

    pub async fn call_expect_error(&self, operation: &str, arguments: Value) -> Result<Failure> {
        self.client.call_expect_error(operation, arguments).await
    }

    /// Calls a create operation and tracks the returned id.
    pub async fn create(
        &mut self,
        kind: ResourceKind,
        operation: &str,
        arguments: Value,
    ) -> Result<Value> {
        let payload = self.client.call(operation, arguments).await?;
        let id = id_of(&payload)?;
        self.ledger.track(kind, id);
        Ok(payload)
    }

    pub fn track(&mut self, kind: ResourceKind, id: impl Into<String>) {
        self.ledger.track(kind, id);
    }

    /// Deletes a record now. It leaves the ledger whether or not the call
    /// succeeds, so teardown never tries it a second time.
    pub async fn delete(&mut self, kind: ResourceKind, id: &str) -> Result<Value> {
        self.ledger.forget(kind, id);
        let mut arguments = Map::new();
        arguments.insert(kind.id_argument().to_string(), Value::String(id.to_string()));
        self.client
            .call(kind.delete_operation(), Value::Object(arguments))
            .await
    }

    pub fn set_fixture(&mut self, key: &str, value: impl Into<Value>) {
        self.fixtures.insert(key.to_string(), value.into());
    }

    pub fn fixture(&self, key: &str) -> Result<&Value> {
        self.fixtures
            .get(key)
            .ok_or_else(|| Error::Check(format!("fixture `{key}` was not set up")))
    }

    pub fn fixture_str(&self, key: &str) -> Result<String> {
        self.fixture(key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Check(format!("fixture `{key}` is not a string")))
    }

    /// Drains the ledger, then closes the session.
    async fn release(&mut self) -> DrainReport {
        let report = self.ledger.drain(&self.client).await;
        self.client.close().await;
        report
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Unstarted,
    SetupRunning,
    Ready,
    Running,
    TeardownRunning,
    Done,
}

impl ScenarioState {
    pub fn can_transition_to(self, next: ScenarioState) -> bool {
        use ScenarioState::*;
        matches!(
            (self, next),
            (Unstarted, SetupRunning)
                | (SetupRunning, Ready)
                | (SetupRunning, Done)
                | (Ready, Running)
                | (Running, Ready)
                | (Ready, TeardownRunning)
                | (TeardownRunning, Done)
        )
    }
}

struct Lifecycle {
    scenario: &'static str,
    history: Vec<ScenarioState>,
}

impl Lifecycle {
    fn new(scenario: &'static str) -> Self {
        Self {
            scenario,
            history: vec![ScenarioState::Unstarted],
        }
    }

    fn current(&self) -> ScenarioState {
        *self.history.last().unwrap_or(&ScenarioState::Unstarted)
    }

    fn advance(&mut self, next: ScenarioState) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "invalid transition from {current:?} to {next:?}"
        );
        tracing::trace!(scenario = self.scenario, from = ?current, to = ?next, "transition");
        self.history.push(next);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed(String),
    /// The feature is absent from this deployment.
    Tolerated(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub status: CaseStatus,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub setup_error: Option<String>,
    pub cases: Vec<CaseReport>,
    pub cleanup: DrainReport,
    pub lifecycle: Vec<ScenarioState>,
}

impl ScenarioReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            setup_error: None,
            cases: Vec::new(),
            cleanup: DrainReport::default(),
            lifecycle: Vec::new(),
        }
    }

    /// A scenario that never produced a report of its own.
    pub fn crashed(name: &str, reason: impl Into<String>) -> Self {
        let mut report = Self::new(name);
        report.setup_error = Some(reason.into());
        report
    }

    fn count(&self, pred: impl Fn(&CaseStatus) -> bool) -> usize {
        self.cases.iter().filter(|case| pred(&case.status)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Failed(_)))
    }

    pub fn tolerated(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Tolerated(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Skipped))
    }

    /// No setup failure and no failed case. Cleanup failures do not count.
    pub fn is_success(&self) -> bool {
        self.setup_error.is_none() && self.failed() == 0
    }

    fn skip_all(&mut self, scenario: &Scenario, status: CaseStatus) {
        self.cases = scenario
            .cases
            .iter()
            .map(|case| CaseReport {
                name: case.name.to_string(),
                status: status.clone(),
                elapsed_ms: 0,
            })
            .collect();
    }
}

/// Runs one scenario to completion: setup, every case in order, teardown.
///
/// Never fails. A setup failure skips the cases; the ledger is still drained
/// and the session closed on every path.
pub async fn run_scenario(
    scenario: &Scenario,
    connector: &dyn Connector,
    settings: &Settings,
) -> ScenarioReport {
    let mut lifecycle = Lifecycle::new(scenario.name);
    let mut report = ScenarioReport::new(scenario.name);
    tracing::info!(scenario = scenario.name, "starting");

    lifecycle.advance(ScenarioState::SetupRunning);
    let client = match open_session(connector, settings).await {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(scenario = scenario.name, %err, "setup failed");
            report.setup_error = Some(err.to_string());
            report.skip_all(scenario, CaseStatus::Skipped);
            lifecycle.advance(ScenarioState::Done);
            report.lifecycle = lifecycle.history;
            return report;
        }
    };
    let mut ctx = ScenarioContext::new(scenario.name, client, settings.clone());

    if let Some(setup) = scenario.setup {
        let status = run_guarded(setup, &mut ctx).await;
        if status != CaseStatus::Passed {
            match status {
                CaseStatus::Tolerated(reason) => {
                    tracing::warn!(scenario = scenario.name, %reason, "feature unavailable");
                    report.skip_all(scenario, CaseStatus::Tolerated(reason));
                }
                CaseStatus::Failed(reason) => {
                    tracing::error!(scenario = scenario.name, %reason, "setup failed");
                    report.setup_error = Some(reason);
                    report.skip_all(scenario, CaseStatus::Skipped);
                }
                CaseStatus::Passed | CaseStatus::Skipped => {}
            }
            report.cleanup = ctx.release().await;
            lifecycle.advance(ScenarioState::Done);
            report.lifecycle = lifecycle.history;
            return report;
        }
    }
    lifecycle.advance(ScenarioState::Ready);

    for case in &scenario.cases {
        lifecycle.advance(ScenarioState::Running);
        let started = Instant::now();
        let status = run_guarded(case.run, &mut ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &status {
            CaseStatus::Passed => tracing::info!(case = case.name, "passed"),
            CaseStatus::Failed(reason) => tracing::error!(case = case.name, %reason, "failed"),
            CaseStatus::Tolerated(reason) => {
                tracing::warn!(case = case.name, %reason, "tolerated")
            }
            CaseStatus::Skipped => {}
        }

        report.cases.push(CaseReport {
            name: case.name.to_string(),
            status,
            elapsed_ms,
        });
        lifecycle.advance(ScenarioState::Ready);
    }

    lifecycle.advance(ScenarioState::TeardownRunning);
    report.cleanup = ctx.release().await;
    if !report.cleanup.is_clean() {
        tracing::warn!(
            scenario = scenario.name,
            orphans = report.cleanup.failed.len(),
            "records left behind"
        );
    }
    lifecycle.advance(ScenarioState::Done);
    report.lifecycle = lifecycle.history;
    report
}

async fn open_session(connector: &dyn Connector, settings: &Settings) -> Result<Client> {
    let endpoint = connector.endpoint()?;
    let mut client = Client::new(endpoint, settings.call_timeout);
    if let Err(err) = client.initialize().await {
        client.close().await;
        return Err(err);
    }
    Ok(client)
}

/// Runs a hook or case, turning errors and panics into a status.
async fn run_guarded(run: CaseFn, ctx: &mut ScenarioContext) -> CaseStatus {
    match AssertUnwindSafe(run(ctx)).catch_unwind().await {
        Ok(Ok(())) => CaseStatus::Passed,
        Ok(Err(Error::Unavailable(reason))) => CaseStatus::Tolerated(reason),
        Ok(Err(err)) => CaseStatus::Failed(err.to_string()),
        Err(panic) => CaseStatus::Failed(format!("panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
