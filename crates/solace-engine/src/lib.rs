//! Conversational-AI engine integration for the Solace platform.
//!
//! Defines the collaborator seam the relay core depends on: a
//! [`ConversationEngine`] produces [`EngineSession`] handles that drive
//! audio I/O through an [`AudioInterface`] and report dialogue events
//! through [`SessionCallbacks`]. The production implementation,
//! [`ElevenLabsEngine`], speaks the provider's conversational WebSocket
//! protocol on a dedicated worker thread per session.

pub mod config;
pub mod elevenlabs;
pub mod error;
pub mod interface;

pub use config::EngineConfig;
pub use elevenlabs::ElevenLabsEngine;
pub use error::EngineError;
pub use interface::{
    AudioFormat, AudioInterface, ConversationEngine, EngineSession, InputCallback,
    SessionCallbacks,
};
