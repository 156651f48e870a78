use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Generation error: {0}")]
    Generation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Coverage violation: {0}")]
    Coverage(String),
    #[error("Corpus not found: {0}")]
    CorpusNotFound(String),
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),
    #[error("Invalid k: {0}")]
    InvalidK(usize),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Internal service error: {0}")]
    Internal(String),
}
