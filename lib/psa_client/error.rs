use thiserror::Error;

#[derive(Error, Debug)]
pub enum PsaClientError {
    #[error("connection error: {0}")]
    ConnectError(String),
    #[error("parse error: {0}")]
    ParseError(String),
    /// The PSA API answered with a non-success status. The response body is
    /// kept verbatim so workers can log the structured error the API returned.
    #[error("unexpected HTTP status while calling {resource}: {status}")]
    UnexpectedStatus {
        resource: String,
        status: u16,
        body: String,
    },
    #[error(transparent)]
    JsonParseError(#[from] serde_json::Error),
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl PsaClientError {
    /// Transient failures are worth another attempt through the queue's
    /// backoff; 4xx responses will fail identically on replay.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectError(_) => true,
            Self::RequestError(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::ParseError(_) | Self::JsonParseError(_) => false,
        }
    }
}
