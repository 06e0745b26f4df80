use crate::{Error, Failure, Outcome, Result};
use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use rmcp::{
    RoleClient, ServiceError, ServiceExt,
    model::{CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation, Tool},
    service::RunningService,
    transport::{
        StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt, future::Future, time::Duration};
use tokio::{io::DuplexStream, process::Command};

type Service = RunningService<RoleClient, ClientInfo>;

/// Where a session connects to
pub enum Endpoint {
    /// Spawn the server as a subprocess and speak over its stdio
    Stdio {
        command: String,
        args: Vec<String>,
        env: Vec<(String, String)>,
    },
    /// Connect to a streamable HTTP endpoint
    Http { url: String, api_key: Option<String> },
    /// An already-connected in-process stream
    Duplex(DuplexStream),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Stdio { command, args, .. } => {
                write!(f, "stdio:{command}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Endpoint::Http { url, .. } => write!(f, "http:{url}"),
            Endpoint::Duplex(_) => f.write_str("duplex"),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({self})")
    }
}

/// Lifecycle of a [`Client`] session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Anything that can send a named operation and normalize the result.
pub trait Invoke {
    fn invoke(
        &self,
        operation: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<Outcome>> + Send;
}

/// A single session against the server under test.
///
/// Calls are strictly sequential: each one awaits its response (or the
/// timeout) before the caller can issue the next. Nothing is retried.
pub struct Client {
    endpoint: Option<Endpoint>,
    service: Option<Service>,
    state: SessionState,
    timeout: Duration,
    tools: BTreeMap<String, Tool>,
    server_name: Option<String>,
}

impl Client {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            endpoint: Some(endpoint),
            service: None,
            state: SessionState::Uninitialized,
            timeout,
            tools: BTreeMap::new(),
            server_name: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name the server reported during the handshake
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Names of the tools the server advertised, sorted
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Performs the handshake. May only succeed once per client.
    pub async fn initialize(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Initializing | SessionState::Ready => {
                return Err(Error::AlreadyInitialized);
            }
            SessionState::Closed => return Err(Error::SessionClosed),
        }

        let endpoint = self.endpoint.take().ok_or(Error::SessionClosed)?;
        self.state = SessionState::Initializing;
        tracing::debug!(%endpoint, "connecting");

        let service = match tokio::time::timeout(self.timeout, connect(endpoint)).await {
            Ok(Ok(service)) => service,
            Ok(Err(err)) => {
                self.state = SessionState::Closed;
                return Err(err);
            }
            Err(_) => {
                self.state = SessionState::Closed;
                return Err(Error::Connection(format!(
                    "handshake timed out after {:?}",
                    self.timeout
                )));
            }
        };

        match service.list_all_tools().await {
            Ok(tools) => {
                self.tools = tools
                    .into_iter()
                    .map(|tool| (tool.name.to_string(), tool))
                    .collect();
            }
            Err(err) => tracing::warn!(%err, "server did not list its tools"),
        }

        self.server_name = service
            .peer_info()
            .map(|info| info.server_info.name.clone());
        tracing::info!(
            server = self.server_name.as_deref().unwrap_or("unknown"),
            tools = self.tools.len(),
            "session ready"
        );

        self.service = Some(service);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Sends one invocation and normalizes whatever comes back.
    ///
    /// Server-reported errors, timeouts and broken transports all become
    /// [`Outcome::Failure`]; only misuse of the session is an `Err`.
    pub async fn invoke(&self, operation: &str, arguments: Value) -> Result<Outcome> {
        let service = match (self.state, self.service.as_ref()) {
            (SessionState::Ready, Some(service)) => service,
            (SessionState::Closed, _) => return Err(Error::SessionClosed),
            _ => return Err(Error::NotInitialized),
        };

        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            _ => return Err(Error::InvalidArguments(operation.to_string())),
        };

        let request = CallToolRequestParam {
            name: operation.to_string().into(),
            arguments,
        };

        tracing::debug!(operation, "call");
        let outcome = match tokio::time::timeout(self.timeout, service.call_tool(request)).await {
            Err(_) => Outcome::Failure(Failure::timeout(operation, self.timeout)),
            Ok(Err(err)) => Outcome::Failure(service_failure(err)),
            Ok(Ok(result)) => normalize(&serde_json::to_value(result)?),
        };

        if let Outcome::Failure(failure) = &outcome {
            tracing::debug!(operation, %failure, "call failed");
        }

        Ok(outcome)
    }

    /// Returns the success payload, or the failure as an error.
    pub async fn call(&self, operation: &str, arguments: Value) -> Result<Value> {
        self.invoke(operation, arguments)
            .await?
            .into_result(operation)
    }

    /// Expects the call to fail and returns the normalized failure.
    pub async fn call_expect_error(&self, operation: &str, arguments: Value) -> Result<Failure> {
        match self.invoke(operation, arguments).await? {
            Outcome::Failure(failure) => Ok(failure),
            Outcome::Success(payload) => Err(Error::UnexpectedSuccess {
                operation: operation.to_string(),
                payload,
            }),
        }
    }

    /// Releases the session. Safe to call in any state; returns whether a
    /// live connection was released by this call.
    pub async fn close(&mut self) -> bool {
        self.endpoint = None;
        self.state = SessionState::Closed;

        let Some(service) = self.service.take() else {
            return false;
        };

        match service.cancel().await {
            Ok(reason) => tracing::debug!(?reason, "session closed"),
            Err(err) => tracing::warn!(%err, "session did not shut down cleanly"),
        }
        true
    }
}

impl Invoke for Client {
    fn invoke(
        &self,
        operation: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<Outcome>> + Send {
        Client::invoke(self, operation, arguments)
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

async fn connect(endpoint: Endpoint) -> Result<Service> {
    let info = client_info();
    match endpoint {
        Endpoint::Stdio { command, args, env } => {
            let mut cmd = Command::new(&command);
            cmd.args(&args).envs(env);
            let transport = TokioChildProcess::new(cmd)
                .map_err(|err| Error::Connection(format!("failed to spawn {command}: {err}")))?;
            info.serve(transport)
                .await
                .map_err(|err| Error::Connection(err.to_string()))
        }
        Endpoint::Http { url, api_key } => {
            let transport = http_transport(url, api_key.as_deref())?;
            info.serve(transport)
                .await
                .map_err(|err| Error::Connection(err.to_string()))
        }
        Endpoint::Duplex(stream) => info
            .serve(stream)
            .await
            .map_err(|err| Error::Connection(err.to_string())),
    }
}

fn http_transport(
    url: String,
    api_key: Option<&str>,
) -> Result<StreamableHttpClientTransport<reqwest::Client>> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
        let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| Error::InvalidConfig("API key is not a valid header value".into()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|err| Error::Connection(err.to_string()))?;

    Ok(StreamableHttpClientTransport::with_client(
        client,
        StreamableHttpClientTransportConfig::with_uri(url),
    ))
}

fn service_failure(err: ServiceError) -> Failure {
    match err {
        ServiceError::McpError(data) => Failure::from_message(data.message.to_string()),
        other => Failure::transport(other.to_string()),
    }
}

/// Normalizes a serialized `CallToolResult`.
///
/// Structured content wins; otherwise text items are parsed as JSON where
/// possible (one item gives a value, several give an array, none gives null).
/// A result flagged `isError` is a failure carrying its text.
pub(crate) fn normalize(raw: &Value) -> Outcome {
    let texts: Vec<&str> = raw
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if raw.get("isError").and_then(Value::as_bool) == Some(true) {
        let message = if texts.is_empty() {
            "tool reported an error without a message".to_string()
        } else {
            texts.join("\n")
        };
        return Outcome::Failure(Failure::from_message(message));
    }

    if let Some(structured) = raw.get("structuredContent").filter(|v| !v.is_null()) {
        return Outcome::Success(structured.clone());
    }

    let payload = match texts.as_slice() {
        [] => Value::Null,
        [text] => parse_text(text),
        texts => Value::Array(texts.iter().map(|text| parse_text(text)).collect()),
    };
    Outcome::Success(payload)
}

fn parse_text(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCategory;
    use serde_json::json;

    #[test]
    fn test_normalize_parses_json_text() {
        let raw = json!({
            "content": [{"type": "text", "text": "{\"id\": \"abc\"}"}],
            "isError": false
        });
        assert_eq!(normalize(&raw), Outcome::Success(json!({"id": "abc"})));
    }

    #[test]
    fn test_normalize_keeps_plain_text() {
        let raw = json!({"content": [{"type": "text", "text": "deleted"}]});
        assert_eq!(normalize(&raw), Outcome::Success(json!("deleted")));
    }

    #[test]
    fn test_normalize_multiple_and_empty() {
        let raw = json!({"content": [
            {"type": "text", "text": "1"},
            {"type": "text", "text": "two"}
        ]});
        assert_eq!(normalize(&raw), Outcome::Success(json!([1, "two"])));

        let raw = json!({"content": []});
        assert_eq!(normalize(&raw), Outcome::Success(Value::Null));
    }

    #[test]
    fn test_normalize_prefers_structured_content() {
        let raw = json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"notes": []}
        });
        assert_eq!(normalize(&raw), Outcome::Success(json!({"notes": []})));
    }

    #[test]
    fn test_normalize_error_flag() {
        let raw = json!({
            "content": [{"type": "text", "text": "API error 404: Note not found"}],
            "isError": true
        });
        let failure = normalize(&raw).failure().cloned().unwrap();
        assert_eq!(failure.status, Some(404));
        assert_eq!(failure.category, ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_calls_require_initialize() {
        let (stream, _server) = tokio::io::duplex(64);
        let client = Client::new(Endpoint::Duplex(stream), Duration::from_secs(1));
        assert_eq!(client.state(), SessionState::Uninitialized);

        let err = client.call("list_notes", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn test_close_without_initialize() {
        let (stream, _server) = tokio::io::duplex(64);
        let mut client = Client::new(Endpoint::Duplex(stream), Duration::from_secs(1));

        assert!(!client.close().await);
        assert_eq!(client.state(), SessionState::Closed);
        assert!(matches!(
            client.initialize().await.unwrap_err(),
            Error::SessionClosed
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_closes_session() {
        // Nobody answers on the other end of the stream.
        let (stream, _server) = tokio::io::duplex(1 << 16);
        let mut client = Client::new(Endpoint::Duplex(stream), Duration::from_millis(50));

        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "{err}");
        assert_eq!(client.state(), SessionState::Closed);
        assert!(!client.close().await);
    }

    #[test]
    fn test_endpoint_display_hides_key() {
        let endpoint = Endpoint::Http {
            url: "http://localhost:3001/mcp".into(),
            api_key: Some("secret".into()),
        };
        assert_eq!(endpoint.to_string(), "http:http://localhost:3001/mcp");
        assert!(!format!("{endpoint:?}").contains("secret"));
    }
}
