use thiserror::Error;

pub type AowlResult<T> = Result<T, AowlError>;

#[derive(Debug, Error)]
pub enum AowlError {
    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
