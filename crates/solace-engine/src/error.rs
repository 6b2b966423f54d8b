use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is not configured: {0}")]
    NotConfigured(String),

    #[error("failed to reach the conversation service: {0}")]
    Connect(String),

    #[error("conversation protocol error: {0}")]
    Protocol(String),

    #[error("conversation channel closed")]
    Closed,
}
