/// Failures of the in-memory knowledge API.
///
/// Messages follow the `API error <code>: <description>` convention of the
/// real server, which proxies HTTP statuses into tool error text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("API error 401: unauthorized, missing API key")]
    Unauthorized,

    #[error("API error 404: {kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("API error 409: {0}")]
    Conflict(String),

    #[error("API error 400: {0}")]
    Validation(String),

    /// An optional subsystem is switched off in this deployment.
    #[error("{0} not configured on this server")]
    NotConfigured(&'static str),

    /// Arguments that could not be understood at all.
    #[error("invalid arguments: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<Error> for rmcp::ErrorData {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(msg) => rmcp::ErrorData::new(
                rmcp::model::ErrorCode::INVALID_PARAMS,
                format!("invalid arguments: {msg}"),
                None,
            ),
            Error::NotFound { .. } => rmcp::ErrorData::new(
                rmcp::model::ErrorCode::RESOURCE_NOT_FOUND,
                err.to_string(),
                None,
            ),
            _ => rmcp::ErrorData::new(
                rmcp::model::ErrorCode::INTERNAL_ERROR,
                err.to_string(),
                None,
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
