//! Relay wire protocol frames.
//!
//! Control traffic is JSON tagged by `type` in both directions. Raw inbound
//! audio travels as untagged binary WebSocket frames and never passes
//! through these types.

use serde::{Deserialize, Serialize};

/// Control messages sent by the client over the relay connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Begin the conversation with the engine.
    #[serde(rename = "start")]
    Start {
        #[serde(default)]
        user_id: Option<String>,
    },
    /// End the conversation.
    #[serde(rename = "stop")]
    Stop,
    /// Diagnostic text path; answered without an engine session.
    #[serde(rename = "text")]
    Text { text: String },
}

/// Messages sent by the server over the relay connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session_created")]
    SessionCreated {
        session_id: String,
        message: String,
    },
    #[serde(rename = "conversation_started")]
    ConversationStarted { message: String },
    #[serde(rename = "conversation_stopped")]
    ConversationStopped { message: String },
    #[serde(rename = "text_response")]
    TextResponse { text: String },
    /// Synthesized agent audio, base64-encoded PCM16.
    #[serde(rename = "audio")]
    Audio {
        audio_data: String,
        encoding: String,
        sample_rate_hz: u32,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
