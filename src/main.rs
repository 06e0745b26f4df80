use anyhow::Context;
use clap::Parser;
use kb_conformance::{Config, Coordinator, IsolatedRunner, runner::print_report, scenarios};
use std::{io::IsTerminal, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

/// Runs conformance scenarios against a knowledge-base MCP server.
#[derive(Debug, Parser)]
#[command(name = "kb-conformance", version, about)]
struct Cli {
    /// Credential forwarded to the server
    #[arg(long, env = "KB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Streamable HTTP endpoint of the server
    #[arg(long, env = "KB_MCP_URL", conflicts_with = "command")]
    url: Option<String>,

    /// Command that starts the server on stdio
    #[arg(long, env = "KB_MCP_COMMAND")]
    command: Option<String>,

    /// Argument for the server command, passed through verbatim (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Seconds to wait for the handshake or any single call
    #[arg(long = "timeout", env = "KB_CALL_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Prefix of the tag placed on every record a run creates
    #[arg(long, env = "KB_TAG_PREFIX", default_value = "mcp-conformance")]
    tag_prefix: String,

    /// Queue jobs with deduplication requested
    #[arg(long, env = "KB_DEDUPLICATE_JOBS")]
    deduplicate_jobs: bool,

    /// Only run the named scenario (repeatable)
    #[arg(long = "scenario", short = 's')]
    scenarios: Vec<String>,

    /// Print the registered scenarios and exit
    #[arg(long)]
    list: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Also write the JSON run summary to this file
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Run every scenario in its own child process
    #[arg(long)]
    isolate: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new()
            .with_call_timeout(Duration::from_secs(self.timeout_secs))
            .with_tag_prefix(&self.tag_prefix)
            .with_deduplicate_jobs(self.deduplicate_jobs);
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key);
        }
        if let Some(url) = &self.url {
            config = config.with_url(url);
        } else if let Some(command) = &self.command {
            config = config.with_command(command, self.args.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // stdout is reserved for the summary
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kb_conformance=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = scenarios::registry();
    if cli.list {
        for scenario in registry.scenarios() {
            println!("{:<12} {}", scenario.name(), scenario.description());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let selected = registry.select(&cli.scenarios)?;
    let config = cli.config();
    config.validate()?;
    tracing::debug!(?config, scenarios = selected.len(), "configuration");

    if cli.json || !std::io::stdout().is_terminal() {
        yansi::disable();
    }

    let show = |report: &kb_conformance::ScenarioReport| {
        if !cli.json {
            print_report(report);
        }
    };

    let summary = if cli.isolate {
        let program = std::env::current_exe().context("failed to locate own executable")?;
        let runner = IsolatedRunner::new(program)
            .with_args(config.child_args())
            .with_env(config.child_env());
        cancel_on_ctrl_c(runner.cancellation_token());
        let names: Vec<&str> = selected.iter().map(|s| s.name()).collect();
        runner.run(&names, show).await
    } else {
        let coordinator = Coordinator::new(Arc::new(config.clone()), config.settings());
        cancel_on_ctrl_c(coordinator.cancellation_token());
        coordinator.run(&selected, show).await
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        print!("{summary}");
    }

    if let Some(path) = &cli.report {
        summary
            .write_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    Ok(ExitCode::from(summary.exit_code() as u8))
}

/// The scenario in flight still finishes its teardown.
fn cancel_on_ctrl_c(token: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current scenario");
            token.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_args_parse_back_verbatim() {
        let config = Config::new().with_command(
            "server",
            vec!["--db".into(), "/tmp/my notes.db".into()],
        );
        let mut argv = vec!["kb-conformance".to_string(), "--command=server".to_string()];
        argv.extend(config.child_args());

        let cli = Cli::try_parse_from(argv).unwrap();
        assert_eq!(cli.args, ["--db", "/tmp/my notes.db"]);
    }
}
