use solace_engine::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("engine is not configured: {0}")]
    Configuration(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("failed to start conversation: {0}")]
    EngineStart(#[from] EngineError),
}
