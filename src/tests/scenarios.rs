use super::*;
use crate::{
    Coordinator,
    scenario::{CaseStatus, ScenarioState},
    scenarios::registry,
};
use tokio::test;

async fn run_all(backend: FakeBackend, settings: Settings) -> crate::RunSummary {
    let registry = registry();
    let scenarios = registry.select(&[]).unwrap();
    Coordinator::new(Arc::new(backend), settings)
        .run(&scenarios, |_| {})
        .await
}

#[test]
async fn test_full_run_passes() {
    let backend = FakeBackend::new();
    let summary = run_all(backend.clone(), settings()).await;

    for report in &summary.reports {
        assert!(report.is_success(), "{report:#?}");
        assert!(report.cleanup.is_clean(), "{report:#?}");
        assert_eq!(
            report.lifecycle.last(),
            Some(&ScenarioState::Done),
            "{}",
            report.name
        );
    }
    assert_eq!(summary.scenarios_run(), 8);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.exit_code(), 0);
    // Nothing a scenario created outlives it.
    assert_eq!(backend.store().record_count(), 0);
}

#[test]
async fn test_unconfigured_backups_are_tolerated() {
    let backend = FakeBackend::new();
    let registry = registry();
    let report = backend.run(registry.get("backups").unwrap()).await;

    assert!(report.is_success());
    assert_eq!(report.tolerated(), report.cases.len());
    assert!(
        report
            .cases
            .iter()
            .all(|case| matches!(&case.status, CaseStatus::Tolerated(reason) if reason.contains("not configured")))
    );
}

#[test]
async fn test_configured_backups_pass() {
    let backend = FakeBackend::with_options(Options {
        backups_configured: true,
        ..Options::default()
    });
    let registry = registry();
    let report = backend.run(registry.get("backups").unwrap()).await;

    assert_eq!(report.passed(), report.cases.len(), "{report:#?}");
}

#[test]
async fn test_encryption_off_is_tolerated() {
    let backend = FakeBackend::with_options(Options {
        encryption_configured: false,
        ..Options::default()
    });
    let registry = registry();
    let report = backend.run(registry.get("encryption").unwrap()).await;

    assert!(report.is_success(), "{report:#?}");
    assert_eq!(report.failed(), 0);
    assert_eq!(report.tolerated(), report.cases.len());
    assert!(report.cleanup.is_clean());
    assert_eq!(backend.store().record_count(), 0);
}

#[test]
async fn test_encryption_off_still_passes_full_run() {
    let backend = FakeBackend::with_options(Options {
        encryption_configured: false,
        ..Options::default()
    });
    let summary = run_all(backend, settings()).await;

    assert_eq!(summary.exit_code(), 0, "{summary}");
}

#[test]
async fn test_jobs_check_both_queueing_behaviours() {
    let registry = registry();
    for deduplicate_jobs in [false, true] {
        let backend = FakeBackend::new();
        let settings = Settings {
            deduplicate_jobs,
            ..settings()
        };
        let report = run_scenario(registry.get("jobs").unwrap(), &backend, &settings).await;

        assert!(report.is_success(), "{report:#?}");
        for name in [
            "repeat queueing creates distinct jobs",
            "deduplicated queueing reuses the pending job",
        ] {
            let case = report.cases.iter().find(|c| c.name == name).unwrap();
            assert_eq!(case.status, CaseStatus::Passed, "{name}");
        }
        assert_eq!(backend.store().record_count(), 0);
    }
}

#[test]
async fn test_unauthenticated_run_fails_every_scenario() {
    let backend = FakeBackend::with_options(Options {
        authenticated: false,
        ..Options::default()
    });
    let summary = run_all(backend, settings()).await;

    assert_eq!(summary.exit_code(), 1);
    // A 401 is a broken deployment, never an absent feature.
    let encryption = summary
        .reports
        .iter()
        .find(|r| r.name == "encryption")
        .unwrap();
    assert!(!encryption.is_success());
    assert_eq!(encryption.tolerated(), 0);

    let notes = summary.reports.iter().find(|r| r.name == "notes").unwrap();
    assert!(notes.setup_error.as_deref().unwrap().contains("401"));
    assert_eq!(notes.skipped(), notes.cases.len());
}
