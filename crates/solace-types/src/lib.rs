//! Shared types for the Solace live backend.
//!
//! Holds the relay wire protocol frames exchanged with the browser client
//! and the session summary type exposed by the listing endpoint.

pub mod protocol;
pub mod summary;

pub use protocol::{ClientMessage, ServerMessage};
pub use summary::SessionSummary;
