use thiserror::Error;

pub type Result<T> = std::result::Result<T, BskyError>;

#[derive(Debug, Error)]
pub enum BskyError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid AT URI: {0}")]
    InvalidUri(String),
}

impl BskyError {
    /// Rate limiting and server-side failures are worth retrying;
    /// credential problems and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            BskyError::Network(_) => true,
            BskyError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BskyError {
    fn from(err: reqwest::Error) -> Self {
        BskyError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for BskyError {
    fn from(err: serde_json::Error) -> Self {
        BskyError::Parse(err.to_string())
    }
}
