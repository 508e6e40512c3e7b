use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Segmenter error: {0}")]
    Segmenter(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Knowledge base error: {0}")]
    Knowledge(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Turn was cancelled")]
    Cancelled,

    #[error(transparent)]
    ChainExhausted(#[from] crate::bus::AggregateFailure),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Audio(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Audio(err.to_string())
    }
}
