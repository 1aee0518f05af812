use thiserror::Error;

/// Failure talking to the generation service (or the scoring collaborators).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerateError {
    #[error("API key not set. Add your OpenRouter API key to the config or pass --api-key.")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for GenerateError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerateError::Timeout
        } else {
            GenerateError::Network(e.to_string())
        }
    }
}

/// No usable JSON could be recovered from a model response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("no JSON start token found in response")]
    NoJson,

    #[error("none of the {candidates} JSON candidates parsed")]
    Unparsable { candidates: usize },

    #[error("JSON found but not in the expected shape: {0}")]
    Shape(String),
}

/// Errors raised inside a pipeline run. They never leave `Pipeline::process_leads`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Application-level errors surfaced by the CLI.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}
