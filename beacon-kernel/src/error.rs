use thiserror::Error;

/// Errors raised by the ingestion pipeline and its collaborators
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type KernelResult<T> = Result<T, KernelError>;
