use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {url}")]
    Timeout { url: String },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("invalid json: {0}")]
    Parse(String),

    #[error("invalid package {id}: {reason}")]
    InvalidPackage { id: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("page error: {0}")]
    Page(String),
}

impl EngineError {
    /// Timeouts, aborted connections and non-2xx responses.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            EngineError::Network(_) | EngineError::Timeout { .. } | EngineError::HttpStatus { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
