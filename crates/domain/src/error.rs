/// Shared error type used across all OSA crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// The prompt exceeded the model's context window. The agent loop
    /// compacts and retries on this variant specifically.
    #[error("context overflow")]
    ContextOverflow,

    #[error("cancelled")]
    Cancelled,

    /// A hook rejected the action.
    #[error("blocked: {0}")]
    Blocked(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The error-envelope tag for the HTTP boundary (`{error: <tag>, ...}`).
    pub fn api_tag(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::NotFound(_) => "not_found",
            Error::ToolNotFound(_) => "tool_error",
            Error::Blocked(_) => "blocked",
            Error::Cancelled => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::ContextOverflow | Error::Provider { .. } | Error::Http(_) => "provider_error",
            _ => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_tags_map_to_envelope() {
        assert_eq!(Error::InvalidRequest("x".into()).api_tag(), "invalid_request");
        assert_eq!(Error::NotFound("s".into()).api_tag(), "not_found");
        assert_eq!(Error::ToolNotFound("e".into()).api_tag(), "tool_error");
        assert_eq!(Error::ContextOverflow.api_tag(), "provider_error");
        assert_eq!(Error::Blocked("no".into()).api_tag(), "blocked");
        assert_eq!(Error::Cancelled.api_tag(), "cancelled");
    }
}
