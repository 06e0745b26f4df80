use crate::{
    Error, Result,
    client::Endpoint,
    scenario::{Connector, Settings},
};
use std::time::Duration;
use url::Url;

/// Environment variable carrying the API credential.
pub const API_KEY_VAR: &str = "KB_API_KEY";

/// How the server under test is reached.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerTarget {
    /// Streamable HTTP endpoint
    Url(String),
    /// Command spawned per session, spoken to over stdio
    Command { program: String, args: Vec<String> },
}

#[derive(Clone)]
pub struct Config {
    /// Credential forwarded to the server
    pub api_key: Option<String>,

    pub server: Option<ServerTarget>,

    /// Upper bound on a single handshake or call
    pub call_timeout: Duration,

    /// Prefix for tags on every test-created record
    pub tag_prefix: String,

    /// Queue jobs with deduplication requested
    pub deduplicate_jobs: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("server", &self.server)
            .field("call_timeout", &self.call_timeout)
            .field("tag_prefix", &self.tag_prefix)
            .field("deduplicate_jobs", &self.deduplicate_jobs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            api_key: None,
            server: None,
            call_timeout: settings.call_timeout,
            tag_prefix: settings.tag_prefix,
            deduplicate_jobs: settings.deduplicate_jobs,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.server = Some(ServerTarget::Url(url.into()));
        self
    }

    pub fn with_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.server = Some(ServerTarget::Command {
            program: program.into(),
            args,
        });
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    pub fn with_deduplicate_jobs(mut self, deduplicate: bool) -> Self {
        self.deduplicate_jobs = deduplicate;
        self
    }

    /// Checks everything a run needs before any scenario starts.
    pub fn validate(&self) -> Result<()> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {}
            _ => return Err(Error::MissingCredential),
        }

        match &self.server {
            None => {
                return Err(Error::InvalidConfig(
                    "no server given: pass --url or --command".into(),
                ));
            }
            Some(ServerTarget::Url(url)) => {
                let parsed = Url::parse(url)
                    .map_err(|err| Error::InvalidConfig(format!("invalid server URL {url}: {err}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(Error::InvalidConfig(format!(
                        "unsupported URL scheme `{}`",
                        parsed.scheme()
                    )));
                }
            }
            Some(ServerTarget::Command { program, .. }) if program.trim().is_empty() => {
                return Err(Error::InvalidConfig("server command is empty".into()));
            }
            Some(ServerTarget::Command { .. }) => {}
        }

        if self.call_timeout.is_zero() {
            return Err(Error::InvalidConfig("call timeout must be positive".into()));
        }

        if self.tag_prefix.trim().is_empty() {
            return Err(Error::InvalidConfig("tag prefix must not be empty".into()));
        }

        Ok(())
    }

    pub fn settings(&self) -> Settings {
        Settings {
            tag_prefix: self.tag_prefix.clone(),
            call_timeout: self.call_timeout,
            deduplicate_jobs: self.deduplicate_jobs,
        }
    }

    /// Environment that reproduces this configuration in a child process.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (
                "KB_CALL_TIMEOUT_SECS".to_string(),
                self.call_timeout.as_secs().max(1).to_string(),
            ),
            ("KB_TAG_PREFIX".to_string(), self.tag_prefix.clone()),
            (
                "KB_DEDUPLICATE_JOBS".to_string(),
                self.deduplicate_jobs.to_string(),
            ),
        ];
        if let Some(key) = &self.api_key {
            env.push((API_KEY_VAR.to_string(), key.clone()));
        }
        match &self.server {
            Some(ServerTarget::Url(url)) => env.push(("KB_MCP_URL".to_string(), url.clone())),
            Some(ServerTarget::Command { program, .. }) => {
                env.push(("KB_MCP_COMMAND".to_string(), program.clone()));
            }
            None => {}
        }
        env
    }

    /// Command-line flags carrying the server arguments to a child run.
    ///
    /// Each argument travels as its own `--arg=VALUE`, so spaces and leading
    /// hyphens survive unchanged.
    pub fn child_args(&self) -> Vec<String> {
        match &self.server {
            Some(ServerTarget::Command { args, .. }) => {
                args.iter().map(|arg| format!("--arg={arg}")).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Connector for Config {
    fn endpoint(&self) -> Result<Endpoint> {
        match &self.server {
            Some(ServerTarget::Url(url)) => Ok(Endpoint::Http {
                url: url.clone(),
                api_key: self.api_key.clone(),
            }),
            Some(ServerTarget::Command { program, args }) => Ok(Endpoint::Stdio {
                command: program.clone(),
                args: args.clone(),
                env: self
                    .api_key
                    .iter()
                    .map(|key| (API_KEY_VAR.to_string(), key.clone()))
                    .collect(),
            }),
            None => Err(Error::InvalidConfig("no server configured".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.api_key.is_none());
        assert!(config.server.is_none());
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.tag_prefix, "mcp-conformance");
        assert!(!config.deduplicate_jobs);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_api_key("key")
            .with_url("http://localhost:3001/mcp")
            .with_call_timeout(Duration::from_secs(5))
            .with_tag_prefix("ci")
            .with_deduplicate_jobs(true);

        assert!(config.validate().is_ok());
        let settings = config.settings();
        assert_eq!(settings.call_timeout, Duration::from_secs(5));
        assert_eq!(settings.tag_prefix, "ci");
        assert!(settings.deduplicate_jobs);
    }

    #[test]
    fn test_missing_credential() {
        let config = Config::new().with_url("http://localhost:3001/mcp");
        assert!(matches!(config.validate(), Err(Error::MissingCredential)));

        let config = config.with_api_key("   ");
        assert!(matches!(config.validate(), Err(Error::MissingCredential)));
    }

    #[test]
    fn test_invalid_server() {
        let config = Config::new().with_api_key("key");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = config.with_url("not a url");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config::new()
            .with_api_key("key")
            .with_url("ftp://example.com/mcp");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme `ftp`"));

        let config = Config::new().with_api_key("key").with_command(" ", vec![]);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::new().with_api_key("hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_endpoint_carries_credential() {
        let config = Config::new()
            .with_api_key("key")
            .with_command("kb-fake-server", vec!["--quiet".into()]);
        match config.endpoint().unwrap() {
            Endpoint::Stdio { command, args, env } => {
                assert_eq!(command, "kb-fake-server");
                assert_eq!(args, ["--quiet"]);
                assert_eq!(env, [(API_KEY_VAR.to_string(), "key".to_string())]);
            }
            other => panic!("unexpected endpoint {other}"),
        }
    }

    #[test]
    fn test_child_env_round_trips_target() {
        let config = Config::new().with_api_key("key").with_command(
            "server",
            vec!["--db".into(), "/tmp/my notes.db".into(), "-v".into()],
        );
        let env = config.child_env();
        assert!(env.contains(&("KB_MCP_COMMAND".into(), "server".into())));
        assert!(env.contains(&(API_KEY_VAR.into(), "key".into())));
        assert!(env.iter().all(|(name, _)| name != "KB_MCP_ARGS"));
        assert_eq!(
            config.child_args(),
            ["--arg=--db", "--arg=/tmp/my notes.db", "--arg=-v"]
        );
    }
}
