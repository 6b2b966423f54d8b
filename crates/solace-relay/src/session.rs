//! One engine conversation bound to one connection.

use crate::bridge::AudioBridge;
use crate::error::Error;
use chrono::{DateTime, Utc};
use solace_engine::{
    AudioInterface, ConversationEngine, EngineConfig, EngineSession, SessionCallbacks,
};
use solace_types::SessionSummary;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Capacity of the per-session event broadcast channel.
const DEFAULT_EVENT_BROADCAST_CAPACITY: usize = 256;

/// Lifecycle states. `Ended` is terminal; a session is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Ended,
}

/// Dialogue notification surfaced by the engine, tagged with the session
/// it belongs to.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    AgentResponse {
        session_id: String,
        text: String,
    },
    AgentResponseCorrection {
        session_id: String,
        original: String,
        corrected: String,
    },
    UserTranscript {
        session_id: String,
        text: String,
    },
}

/// One conversation session. Owns its [`AudioBridge`] and, once started,
/// the engine session handle; both are released on end.
///
/// Locks here are `std::sync` intentionally: every acquisition is a brief
/// field read or swap that never spans an `.await` point.
pub struct ConversationSession {
    id: String,
    user_id: Mutex<Option<String>>,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    bridge: Arc<AudioBridge>,
    engine: Mutex<Option<Arc<dyn EngineSession>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ConversationSession {
    pub(crate) fn new(id: String, user_id: Option<String>, bridge: Arc<AudioBridge>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_BROADCAST_CAPACITY);
        Self {
            id,
            user_id: Mutex::new(user_id),
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Created),
            bridge,
            engine: Mutex::new(None),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bridge(&self) -> &Arc<AudioBridge> {
        &self.bridge
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn set_user_id(&self, user_id: String) {
        *self.user_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(user_id);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            user_id: self
                .user_id
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            created_at: self.created_at,
            is_active: self.is_active(),
        }
    }

    /// Subscribes to dialogue notifications for this session.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Starts the engine conversation. Only valid from `Created`; a second
    /// start fails with [`Error::InvalidState`] and constructs nothing.
    /// The blocking engine start runs on the blocking pool so the caller's
    /// control loop stays free. On engine failure the caller is expected
    /// to end the session immediately (see `SessionRegistry::start`).
    pub(crate) async fn start(
        &self,
        engine: Arc<dyn ConversationEngine>,
        config: &EngineConfig,
    ) -> Result<(), Error> {
        if !config.is_configured() {
            return Err(Error::Configuration(
                "engine API key and agent id must be set".to_string(),
            ));
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                SessionState::Created => *state = SessionState::Active,
                SessionState::Active => {
                    return Err(Error::InvalidState(format!(
                        "session {} is already active",
                        self.id
                    )))
                }
                SessionState::Ended => {
                    return Err(Error::InvalidState(format!(
                        "session {} has already ended",
                        self.id
                    )))
                }
            }
        }

        let handle: Arc<dyn EngineSession> = Arc::from(engine.create_session(
            &config.agent_id,
            self.bridge.clone(),
            self.engine_callbacks(),
        )?);
        *self.engine.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle.clone());

        let result = tokio::task::spawn_blocking(move || handle.start_session()).await;
        match result {
            Ok(Ok(())) => {
                tracing::info!(session_id = %self.id, "engine conversation started");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::EngineStart(e)),
            Err(e) => Err(Error::EngineStart(solace_engine::EngineError::Protocol(
                format!("engine start task failed: {e}"),
            ))),
        }
    }

    /// Tears the session down. Idempotent: the first call transitions to
    /// `Ended` and releases the engine handle and bridge; later calls
    /// return immediately. Engine teardown errors are logged, never
    /// surfaced — end always succeeds from the caller's point of view.
    pub(crate) async fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == SessionState::Ended {
                return;
            }
            *state = SessionState::Ended;
        }

        let engine = self
            .engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(engine) = engine {
            let session_id = self.id.clone();
            let result = tokio::task::spawn_blocking(move || engine.end_session()).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %session_id, "engine session teardown failed: {}", e);
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "engine teardown task failed: {}", e);
                }
            }
        }

        self.bridge.end();
        let dropped = self.bridge.drain();
        if dropped > 0 {
            tracing::debug!(
                session_id = %self.id,
                frames = dropped,
                "discarded queued audio frames"
            );
        }
        tracing::info!(session_id = %self.id, "conversation session ended");
    }

    fn engine_callbacks(&self) -> SessionCallbacks {
        let events = self.events.clone();
        let id = self.id.clone();
        let on_agent_response = {
            let events = events.clone();
            let id = id.clone();
            Box::new(move |text: &str| {
                tracing::info!(session_id = %id, "agent: {}", text);
                let _ = events.send(SessionEvent::AgentResponse {
                    session_id: id.clone(),
                    text: text.to_string(),
                });
            })
        };
        let on_agent_response_correction = {
            let events = events.clone();
            let id = id.clone();
            Box::new(move |original: &str, corrected: &str| {
                tracing::info!(session_id = %id, "agent correction: {} -> {}", original, corrected);
                let _ = events.send(SessionEvent::AgentResponseCorrection {
                    session_id: id.clone(),
                    original: original.to_string(),
                    corrected: corrected.to_string(),
                });
            })
        };
        let on_user_transcript = Box::new(move |text: &str| {
            tracing::info!(session_id = %id, "user: {}", text);
            let _ = events.send(SessionEvent::UserTranscript {
                session_id: id.clone(),
                text: text.to_string(),
            });
        });

        SessionCallbacks {
            on_agent_response,
            on_agent_response_correction,
            on_user_transcript,
        }
    }
}
