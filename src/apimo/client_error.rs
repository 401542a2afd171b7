use thiserror::Error;

/// Failure to fetch or decode one page of listings.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("client setup failed: {0}")]
    Setup(String),
}
