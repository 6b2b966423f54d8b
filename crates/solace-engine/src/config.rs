use serde::{Deserialize, Serialize};
use std::fmt;

fn default_output_sample_rate_hz() -> u32 {
    24_000
}

/// Credentials and identity for the external conversational-AI engine.
///
/// Both `api_key` and `agent_id` must be non-empty before a conversation
/// can be started; see [`EngineConfig::is_configured`].
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub agent_id: String,
    /// Sample rate tag attached to PCM16 chunks relayed to the frontend.
    #[serde(default = "default_output_sample_rate_hz")]
    pub output_sample_rate_hz: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            agent_id: String::new(),
            output_sample_rate_hz: default_output_sample_rate_hz(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &"[REDACTED]")
            .field("agent_id", &self.agent_id)
            .field("output_sample_rate_hz", &self.output_sample_rate_hz)
            .finish()
    }
}

impl EngineConfig {
    pub fn new(api_key: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            agent_id: agent_id.into(),
            output_sample_rate_hz: default_output_sample_rate_hz(),
        }
    }

    /// Whether both credentials and agent identity are present.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.agent_id.is_empty()
    }
}
