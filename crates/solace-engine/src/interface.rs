//! The collaborator seam between the relay core and the engine.
//!
//! The engine is callback-driven: it pulls user audio through an
//! [`InputCallback`] registered on the [`AudioInterface`] and pushes
//! synthesized audio back through [`AudioInterface::deliver_outbound`],
//! from whatever thread its session runs on. The transport behind the
//! interface is the relay's concern, not the engine's.

use crate::error::EngineError;
use std::sync::Arc;

/// Format descriptor attached to synthesized audio frames.
#[derive(Debug, Clone, Copy)]
pub struct AudioFormat {
    pub encoding: &'static str,
    pub sample_rate_hz: u32,
}

impl AudioFormat {
    pub const fn pcm16(sample_rate_hz: u32) -> Self {
        Self {
            encoding: "pcm16",
            sample_rate_hz,
        }
    }
}

/// Callback through which the engine receives user audio frames.
///
/// Invoked synchronously from the relay's receive path; failures are
/// logged by the caller and never abort the stream.
pub type InputCallback = Arc<dyn Fn(&[u8]) -> Result<(), EngineError> + Send + Sync>;

/// The engine-facing face of the audio transport.
pub trait AudioInterface: Send + Sync {
    /// Registers the engine's input callback and begins forwarding
    /// inbound user audio to it.
    fn begin(&self, input: InputCallback);

    /// Stops forwarding inbound audio. Never fails; safe to call more
    /// than once.
    fn end(&self);

    /// Pushes a synthesized audio frame toward the client. Callable from
    /// any thread; implementations must hand the frame off to the
    /// connection's owning execution context rather than touching the
    /// transport directly, and must bound how long the calling thread
    /// can be held up.
    fn deliver_outbound(&self, frame: &[u8], format: AudioFormat);
}

/// Dialogue notifications raised by the engine during a conversation.
pub struct SessionCallbacks {
    pub on_agent_response: Box<dyn Fn(&str) + Send + Sync>,
    pub on_agent_response_correction: Box<dyn Fn(&str, &str) + Send + Sync>,
    pub on_user_transcript: Box<dyn Fn(&str) + Send + Sync>,
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks").finish_non_exhaustive()
    }
}

/// Handle to one engine conversation.
pub trait EngineSession: Send + Sync {
    /// Starts the conversation. Blocking by contract: returns once the
    /// engine has accepted the session or failed to. Callers must not
    /// invoke this from an async context directly.
    fn start_session(&self) -> Result<(), EngineError>;

    /// Tears the conversation down. Idempotent; safe to call while a
    /// start is still in flight.
    fn end_session(&self) -> Result<(), EngineError>;
}

/// Factory for engine conversations.
pub trait ConversationEngine: Send + Sync {
    fn create_session(
        &self,
        agent_id: &str,
        audio: Arc<dyn AudioInterface>,
        callbacks: SessionCallbacks,
    ) -> Result<Box<dyn EngineSession>, EngineError>;
}
