//! Sequential run coordination.
//!
//! Scenarios share one live backing store, so they never overlap in time:
//! each one (teardown included) finishes before the next starts.

use crate::{
    Result,
    scenario::{CaseStatus, Connector, Scenario, ScenarioReport, Settings, run_scenario},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use yansi::Paint;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub reports: Vec<ScenarioReport>,
    /// The run was interrupted before every scenario ran.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn scenarios_run(&self) -> usize {
        self.reports.len()
    }

    pub fn total_cases(&self) -> usize {
        self.reports.iter().map(|r| r.cases.len()).sum()
    }

    pub fn passed(&self) -> usize {
        self.reports.iter().map(ScenarioReport::passed).sum()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().map(ScenarioReport::failed).sum()
    }

    pub fn tolerated(&self) -> usize {
        self.reports.iter().map(ScenarioReport::tolerated).sum()
    }

    pub fn skipped(&self) -> usize {
        self.reports.iter().map(ScenarioReport::skipped).sum()
    }

    pub fn failed_scenarios(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.reports.iter().all(ScenarioReport::is_success)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scenarios run: {}", self.scenarios_run())?;
        writeln!(f, "Total cases:   {}", self.total_cases())?;
        writeln!(f, "Passed:        {}", self.passed())?;
        writeln!(f, "Failed:        {}", self.failed())?;
        writeln!(f, "Tolerated:     {}", self.tolerated())?;
        writeln!(f, "Skipped:       {}", self.skipped())?;
        if self.cancelled {
            writeln!(f, "Run cancelled before all scenarios ran")?;
        }
        let failed = self.failed_scenarios();
        if !failed.is_empty() {
            writeln!(f, "Failed scenarios:")?;
            for name in failed {
                writeln!(f, "  - {name}")?;
            }
        }
        Ok(())
    }
}

/// Prints one scenario's results as they come in.
pub fn print_report(report: &ScenarioReport) {
    let verdict = if report.is_success() {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    println!("{verdict} {} ({} cases)", report.name, report.cases.len());

    if let Some(reason) = &report.setup_error {
        println!("  {} {reason}", "setup failed:".red());
    }
    for case in &report.cases {
        match &case.status {
            CaseStatus::Passed => println!("  {} {}", "ok".green(), case.name),
            CaseStatus::Failed(reason) => {
                println!("  {} {}: {reason}", "FAILED".red(), case.name)
            }
            CaseStatus::Tolerated(reason) => {
                println!("  {} {}: {reason}", "tolerated".yellow(), case.name)
            }
            CaseStatus::Skipped => println!("  {} {}", "skipped".dim(), case.name),
        }
    }
    for (resource, failure) in &report.cleanup.failed {
        println!("  {} {resource}: {failure}", "orphaned".yellow());
    }
}

/// Runs scenarios one at a time inside this process.
pub struct Coordinator {
    connector: Arc<dyn Connector>,
    settings: Settings,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(connector: Arc<dyn Connector>, settings: Settings) -> Self {
        Self {
            connector,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling stops the run before the next scenario starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(
        &self,
        scenarios: &[&Scenario],
        mut on_report: impl FnMut(&ScenarioReport),
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for scenario in scenarios {
            if self.cancel.is_cancelled() {
                tracing::warn!(next = scenario.name(), "run cancelled");
                summary.cancelled = true;
                break;
            }
            let report = run_scenario(scenario, self.connector.as_ref(), &self.settings).await;
            on_report(&report);
            summary.reports.push(report);
        }
        summary
    }
}

/// Runs every scenario in a fresh child process of `program`, one after
/// another.
///
/// The child is invoked as `program <args> --scenario <name> --json` and must
/// print a [`RunSummary`] on stdout. A child that exits without one is
/// recorded as a failed scenario.
pub struct IsolatedRunner {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cancel: CancellationToken,
}

impl IsolatedRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(
        &self,
        names: &[&str],
        mut on_report: impl FnMut(&ScenarioReport),
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for name in names {
            if self.cancel.is_cancelled() {
                tracing::warn!(next = name, "run cancelled");
                summary.cancelled = true;
                break;
            }
            let report = self.run_one(name).await;
            on_report(&report);
            summary.reports.push(report);
        }
        summary
    }

    async fn run_one(&self, name: &str) -> ScenarioReport {
        tracing::info!(scenario = name, program = %self.program.display(), "spawning");
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(["--scenario", name, "--json"])
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(err) => return ScenarioReport::crashed(name, format!("failed to spawn: {err}")),
        };

        match serde_json::from_slice::<RunSummary>(&output.stdout) {
            Ok(mut child) => match child.reports.pop() {
                Some(report) if report.name == name => report,
                _ => ScenarioReport::crashed(name, "child reported a different scenario"),
            },
            Err(err) => {
                tracing::debug!(%err, "unreadable child report");
                ScenarioReport::crashed(
                    name,
                    format!("process exited with {} without a report", output.status),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::CaseReport;

    fn report(name: &str, statuses: Vec<CaseStatus>) -> ScenarioReport {
        let mut report = ScenarioReport::crashed(name, "");
        report.setup_error = None;
        report.cases = statuses
            .into_iter()
            .enumerate()
            .map(|(i, status)| CaseReport {
                name: format!("case {i}"),
                status,
                elapsed_ms: 0,
            })
            .collect();
        report
    }

    fn summary() -> RunSummary {
        RunSummary {
            reports: vec![
                report("notes", vec![CaseStatus::Passed, CaseStatus::Passed]),
                report(
                    "templates",
                    vec![CaseStatus::Passed, CaseStatus::Failed("missing".into())],
                ),
                report(
                    "backups",
                    vec![CaseStatus::Tolerated("not configured".into())],
                ),
                ScenarioReport::crashed("jobs", "connection failed"),
            ],
            cancelled: false,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = summary();
        assert_eq!(summary.scenarios_run(), 4);
        assert_eq!(summary.total_cases(), 5);
        assert_eq!(summary.passed(), 3);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.tolerated(), 1);
        assert_eq!(summary.failed_scenarios(), ["templates", "jobs"]);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_summary_display() {
        insta::assert_snapshot!(summary().to_string(), @r"
        Scenarios run: 4
        Total cases:   5
        Passed:        3
        Failed:        1
        Tolerated:     1
        Skipped:       0
        Failed scenarios:
          - templates
          - jobs
        ");
    }

    #[test]
    fn test_clean_run_exits_zero() {
        let summary = RunSummary {
            reports: vec![report("notes", vec![CaseStatus::Passed])],
            cancelled: false,
        };
        assert_eq!(summary.exit_code(), 0);

        let cancelled = RunSummary {
            cancelled: true,
            ..summary
        };
        assert_eq!(cancelled.exit_code(), 1);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        summary().write_json(&path).unwrap();

        let read: RunSummary = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, summary());
    }

    #[tokio::test]
    async fn test_isolated_runner_records_missing_report() {
        // `true` exits successfully without printing a report.
        let runner = IsolatedRunner::new("true");
        let summary = runner.run(&["notes"], |_| {}).await;

        assert_eq!(summary.scenarios_run(), 1);
        let report = &summary.reports[0];
        assert_eq!(report.name, "notes");
        assert!(!report.is_success());
        assert!(
            report
                .setup_error
                .as_deref()
                .unwrap()
                .contains("without a report")
        );
    }

    #[tokio::test]
    async fn test_isolated_runner_spawn_failure() {
        let runner = IsolatedRunner::new("/nonexistent/kb-conformance");
        let summary = runner.run(&["notes", "links"], |_| {}).await;

        assert_eq!(summary.failed_scenarios(), ["notes", "links"]);
        assert!(
            summary.reports[0]
                .setup_error
                .as_deref()
                .unwrap()
                .starts_with("failed to spawn")
        );
    }

    #[tokio::test]
    async fn test_isolated_runner_stops_when_cancelled() {
        let runner = IsolatedRunner::new("true");
        runner.cancellation_token().cancel();
        let summary = runner.run(&["notes"], |_| {}).await;
        assert!(summary.cancelled);
        assert!(summary.reports.is_empty());
    }
}
