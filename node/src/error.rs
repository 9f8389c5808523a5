use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scoring error: {0}")]
    Scoring(#[from] veriscore_core::Error),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Spool error: {0}")]
    Spool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dashboard error: {0}")]
    Dashboard(String),
}

pub type NodeResult<T> = Result<T, NodeError>;
