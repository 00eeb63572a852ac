use thiserror::Error;

pub type Result<T> = std::result::Result<T, MagpieError>;

#[derive(Error, Debug)]
pub enum MagpieError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transient upstream error: {0}")]
    Transient(String),

    #[error("Generation timed out: {0}")]
    GenerationTimeout(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Upstream rejected request: {0}")]
    Api(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Cursor advanced from stale base (expected {expected:?}, stored {stored:?})")]
    CursorConflict {
        expected: Option<String>,
        stored: Option<String>,
    },

    #[error("Retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<MagpieError>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MagpieError {
    /// Whether RetryPolicy should attempt this operation again.
    ///
    /// Auth and config failures are fatal: retrying with the same bad
    /// credentials cannot succeed. Cursor conflicts mean the caller must
    /// re-read the cursor, not replay the same write.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MagpieError::Transient(_)
                | MagpieError::GenerationTimeout(_)
                | MagpieError::Generation(_)
        )
    }
}
