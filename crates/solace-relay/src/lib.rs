//! Real-time conversational audio relay core.
//!
//! Bridges a browser-side duplex audio stream with a callback-driven
//! conversational-AI engine. Three pieces:
//!
//! - [`AudioBridge`] moves audio bytes between one connection and the
//!   engine's callback interface, with all outbound traffic scheduled on
//!   the connection's owning task.
//! - [`ConversationSession`] wraps one engine conversation and its state
//!   machine (`Created → Active → Ended`).
//! - [`SessionRegistry`] is the process-wide table of live sessions.
//!
//! The per-connection protocol loop lives in the server crate; this crate
//! is transport-agnostic apart from the outbound frame channel it hands
//! to the bridge.

pub mod bridge;
pub mod error;
pub mod registry;
pub mod session;

pub use bridge::{AudioBridge, OutboundFrame, DELIVERY_TIMEOUT};
pub use error::Error;
pub use registry::SessionRegistry;
pub use session::{ConversationSession, SessionEvent, SessionState};
