use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipewatchError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to determine GitLab project ID: {0}")]
    ProjectIdUnresolved(String),

    #[error("GitLab API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipewatchError>;
