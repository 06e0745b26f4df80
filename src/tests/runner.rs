use super::*;
use crate::{
    Coordinator, RunSummary, check,
    check::id_of,
    ledger::ResourceKind,
    scenario::{CaseStatus, ScenarioContext, ScenarioState},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::json;
use tokio::test;

fn create_then_fail(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        ctx.create(
            ResourceKind::Note,
            "create_note",
            json!({"content": "# Half set up"}),
        )
        .await?;
        check!(false, "fixture could not be prepared");
        Ok(())
    }
    .boxed()
}

fn create_note(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let note = ctx
            .create(ResourceKind::Note, "create_note", json!({"content": "# N"}))
            .await?;
        ctx.set_fixture("note", id_of(&note)?);
        Ok(())
    }
    .boxed()
}

fn panics(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        if ctx.fixture("note").is_ok() {
            panic!("boom");
        }
        Ok(())
    }
    .boxed()
}

fn passes(_ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move { Ok(()) }.boxed()
}

#[test]
async fn test_setup_failure_skips_cases_and_cleans_up() {
    let backend = FakeBackend::new();
    let scenario = Scenario::new("broken")
        .setup(create_then_fail)
        .case("never runs", passes)
        .case("never runs either", passes);

    let report = backend.run(&scenario).await;

    assert!(!report.is_success());
    assert!(
        report
            .setup_error
            .as_deref()
            .unwrap()
            .contains("fixture could not be prepared")
    );
    assert_eq!(report.skipped(), 2);
    assert_eq!(report.cleanup.deleted.len(), 1);
    assert_eq!(backend.store().record_count(), 0);
    assert_eq!(
        report.lifecycle,
        [
            ScenarioState::Unstarted,
            ScenarioState::SetupRunning,
            ScenarioState::Done
        ]
    );
}

#[test]
async fn test_panicking_case_is_contained() {
    let backend = FakeBackend::new();
    let scenario = Scenario::new("panicky")
        .case("creates", create_note)
        .case("panics", panics)
        .case("still runs", passes);

    let report = backend.run(&scenario).await;

    let statuses: Vec<_> = report.cases.iter().map(|c| c.status.clone()).collect();
    assert_eq!(
        statuses,
        [
            CaseStatus::Passed,
            CaseStatus::Failed("panicked: boom".into()),
            CaseStatus::Passed,
        ]
    );
    assert!(report.cleanup.is_clean());
    assert_eq!(backend.store().record_count(), 0);
}

#[test]
async fn test_unreachable_server_fails_each_scenario_in_order() {
    let registry = crate::scenarios::registry();
    let selected = registry
        .select(&["links".to_string(), "notes".to_string()])
        .unwrap();
    let coordinator = Coordinator::new(Arc::new(Unreachable), settings());

    let mut seen = vec![];
    let summary = coordinator
        .run(&selected, |report| seen.push(report.name.clone()))
        .await;

    assert_eq!(seen, ["notes", "links"]);
    assert_eq!(summary.failed_scenarios(), ["notes", "links"]);
    assert_eq!(summary.passed(), 0);
    assert_eq!(summary.skipped(), summary.total_cases());
    assert_eq!(summary.exit_code(), 1);
}

#[test]
async fn test_cancelled_run_stops_before_next_scenario() {
    let backend = FakeBackend::new();
    let registry = crate::scenarios::registry();
    let selected = registry.select(&[]).unwrap();
    let coordinator = Coordinator::new(Arc::new(backend), settings());
    let token = coordinator.cancellation_token();

    let summary = coordinator
        .run(&selected, |_| token.cancel())
        .await;

    assert!(summary.cancelled);
    assert_eq!(summary.scenarios_run(), 1);
    assert_eq!(summary.exit_code(), 1);
}

#[test]
async fn test_report_file_round_trips() {
    let backend = FakeBackend::new();
    let registry = crate::scenarios::registry();
    let selected = registry.select(&["notes".to_string()]).unwrap();
    let summary = Coordinator::new(Arc::new(backend), settings())
        .run(&selected, |_| {})
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    summary.write_json(&path).unwrap();

    let written: RunSummary =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, summary);
    assert_eq!(written.reports[0].name, "notes");
}
