//! Normalized results of a single tool invocation.
//!
//! Every invocation ends in exactly one [`Outcome`]: a success payload or a
//! [`Failure`]. Failures carry the server's message, the proxied HTTP status
//! when the message follows the `API error <code>: <description>` convention,
//! and a coarse [`ErrorCategory`] derived from both.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::LazyLock, time::Duration};

static API_ERROR_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAPI error (\d{3})\b").expect("static regex"));

/// Keyword table used when the message carries no usable status code.
///
/// Rules are checked in order and the first match wins.
const RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::NotFound,
        &["not found", "does not exist", "no such"],
    ),
    (
        ErrorCategory::Auth,
        &[
            "unauthorized",
            "forbidden",
            "authentication",
            "invalid token",
            "permission denied",
        ],
    ),
    (
        ErrorCategory::Conflict,
        &["already exists", "duplicate", "conflict"],
    ),
    (
        ErrorCategory::Validation,
        &[
            "too short",
            "too long",
            "at least",
            "minimum",
            "maximum",
            "must be",
            "must not",
            "required",
            "missing",
            "invalid",
        ],
    ),
    (ErrorCategory::BadRequest, &["bad request", "malformed"]),
    (
        ErrorCategory::ServerError,
        &["internal error", "internal server error", "database error"],
    ),
];

/// Phrases a deployment uses when an optional subsystem is switched off.
///
/// They only apply when the message has no status or a 501/503 status. Any
/// other status keeps its own category, so an auth or server error is never
/// mistaken for an absent feature.
const UNAVAILABLE_PHRASES: &[&str] = &["not configured", "not available", "not enabled"];

/// Coarse classification of a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    BadRequest,
    Validation,
    Auth,
    Conflict,
    ServerError,
    /// The deployment does not provide the requested feature.
    Unavailable,
    /// No response arrived within the transport limit.
    Timeout,
    /// The session broke before a response arrived.
    Transport,
    Unknown,
}

impl ErrorCategory {
    pub fn from_status(status: u16) -> Option<Self> {
        let category = match status {
            400 => Self::BadRequest,
            401 | 403 => Self::Auth,
            404 | 410 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::Validation,
            402..=499 => Self::BadRequest,
            500..=599 => Self::ServerError,
            _ => return None,
        };
        Some(category)
    }

    /// Classifies a free-text message.
    ///
    /// Unavailable phrasing wins when there is no status or a 501/503, then
    /// the proxied status code, then the keyword table. A bare 400 is refined to `Validation` or `Conflict`
    /// when the wording says so.
    pub fn classify(message: &str, status: Option<u16>) -> Self {
        let lower = message.to_lowercase();

        let may_be_absent = matches!(status, None | Some(501 | 503));
        if may_be_absent && UNAVAILABLE_PHRASES.iter().any(|p| lower.contains(p)) {
            return Self::Unavailable;
        }

        let by_keyword = RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(category, _)| *category);

        match status.and_then(Self::from_status) {
            Some(Self::BadRequest) => match by_keyword {
                Some(refined @ (Self::Validation | Self::Conflict)) => refined,
                _ => Self::BadRequest,
            },
            Some(category) => category,
            None => by_keyword.unwrap_or(Self::Unknown),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not-found",
            Self::BadRequest => "bad-request",
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Conflict => "conflict",
            Self::ServerError => "server-error",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Pulls the numeric code out of an `API error <code>: ...` message.
pub fn status_code(message: &str) -> Option<u16> {
    API_ERROR_STATUS
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

/// A failed invocation as seen by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    pub status: Option<u16>,
    pub category: ErrorCategory,
}

impl Failure {
    /// Builds a failure from a server-reported message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let status = status_code(&message);
        let category = ErrorCategory::classify(&message, status);
        Self {
            message,
            status,
            category,
        }
    }

    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self {
            message: format!("{operation} timed out after {after:?}"),
            status: None,
            category: ErrorCategory::Timeout,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            category: ErrorCategory::Transport,
        }
    }

    /// Case-insensitive check for any of the given phrases.
    pub fn mentions_any(&self, phrases: &[&str]) -> bool {
        let lower = self.message.to_lowercase();
        phrases.iter().any(|p| lower.contains(&p.to_lowercase()))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// The normalized result of one invocation. Exactly one side is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Outcome::Success(payload) => Some(payload),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    /// Converts into a `Result`, attributing a failure to `operation`.
    pub fn into_result(self, operation: &str) -> crate::Result<Value> {
        match self {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Failure(failure) => Err(crate::Error::Call {
                operation: operation.to_string(),
                failure,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_extraction() {
        assert_eq!(status_code("API error 404: Note not found"), Some(404));
        assert_eq!(status_code("api error 500: boom"), Some(500));
        assert_eq!(status_code("Passphrase too short"), None);
        assert_eq!(status_code("API error 4040: nope"), None);
    }

    #[test]
    fn test_classify_prefers_status() {
        let failure = Failure::from_message("API error 404: Note abc");
        assert_eq!(failure.status, Some(404));
        assert_eq!(failure.category, ErrorCategory::NotFound);

        let failure = Failure::from_message("API error 502: upstream");
        assert_eq!(failure.category, ErrorCategory::ServerError);
    }

    #[test]
    fn test_bad_request_is_refined_by_wording() {
        let failure = Failure::from_message(
            "API error 400: Passphrase too short (minimum 12 characters required)",
        );
        assert_eq!(failure.category, ErrorCategory::Validation);

        let failure = Failure::from_message("API error 400: Concept notation already exists");
        assert_eq!(failure.category, ErrorCategory::Conflict);

        let failure = Failure::from_message("API error 400: unexpected body");
        assert_eq!(failure.category, ErrorCategory::BadRequest);
    }

    #[test]
    fn test_classify_without_status() {
        let cases = [
            ("Note not found", ErrorCategory::NotFound),
            ("Unauthorized: invalid token", ErrorCategory::Auth),
            ("a template named x already exists", ErrorCategory::Conflict),
            ("field 'content' is required", ErrorCategory::Validation),
            ("internal error: pool exhausted", ErrorCategory::ServerError),
            ("something odd happened", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(
                ErrorCategory::classify(message, None),
                expected,
                "classifying {message:?}"
            );
        }
    }

    #[test]
    fn test_unavailable_wins_over_status() {
        let failure = Failure::from_message("API error 503: Scheduled backups not configured");
        assert_eq!(failure.status, Some(503));
        assert_eq!(failure.category, ErrorCategory::Unavailable);

        let failure = Failure::from_message("Encryption not configured on this server");
        assert_eq!(failure.category, ErrorCategory::Unavailable);
    }

    #[test]
    fn test_unavailable_wording_does_not_mask_other_statuses() {
        let cases = [
            ("API error 401: API key not configured", ErrorCategory::Auth),
            ("API error 403: account disabled", ErrorCategory::Auth),
            ("API error 403: feature not enabled for this key", ErrorCategory::Auth),
            ("API error 500: embedding model not available", ErrorCategory::ServerError),
        ];
        for (message, expected) in cases {
            assert_eq!(
                Failure::from_message(message).category,
                expected,
                "classifying {message:?}"
            );
        }
        assert_eq!(
            ErrorCategory::classify("account disabled", None),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_outcome_into_result() {
        let ok = Outcome::Success(serde_json::json!({"id": "1"}));
        assert!(ok.is_success());
        assert_eq!(ok.into_result("get_note").unwrap()["id"], "1");

        let err = Outcome::Failure(Failure::from_message("Note not found"));
        let err = err.into_result("get_note").unwrap_err();
        assert!(err.to_string().contains("get_note failed"));
        assert_eq!(err.failure().unwrap().category, ErrorCategory::NotFound);
    }
}
