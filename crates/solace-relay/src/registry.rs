//! Process-wide table of active conversation sessions.

use crate::bridge::{AudioBridge, OutboundFrame};
use crate::error::Error;
use crate::session::ConversationSession;
use chrono::Utc;
use solace_engine::{ConversationEngine, EngineConfig};
use solace_types::SessionSummary;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Registry of live sessions keyed by session identifier.
///
/// All mutation goes through these operations; connection handlers never
/// share the map directly. Holds the engine factory and its configuration
/// so sessions can be started without threading them through callers.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ConversationSession>>>,
    engine: Arc<dyn ConversationEngine>,
    config: EngineConfig,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn ConversationEngine>, config: EngineConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            engine,
            config,
        }
    }

    pub fn is_engine_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Creates a session bound to a connection's outbound channel and
    /// registers it. The identifier keeps the wall-clock prefix operators
    /// grep for in logs; the random suffix carries uniqueness.
    pub async fn create(
        &self,
        outbound: mpsc::Sender<OutboundFrame>,
        user_id: Option<String>,
    ) -> Arc<ConversationSession> {
        let mut sessions = self.sessions.write().await;
        let mut session_id = new_session_id();
        while sessions.contains_key(&session_id) {
            session_id = new_session_id();
        }

        let bridge = Arc::new(AudioBridge::new(session_id.clone(), outbound));
        let session = Arc::new(ConversationSession::new(
            session_id.clone(),
            user_id,
            bridge,
        ));
        sessions.insert(session_id.clone(), session.clone());
        drop(sessions);

        tracing::info!(session_id = %session_id, "created conversation session");
        session
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Point-in-time snapshot of live sessions. Holds the read lock only
    /// for the copy.
    pub async fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .await
            .values()
            .map(|session| session.summary())
            .collect()
    }

    /// Starts a session's engine conversation. `InvalidState` failures
    /// (double start) leave the session alone; configuration and engine
    /// failures end it immediately, per the state machine's abort edge.
    pub async fn start(&self, session_id: &str, user_id: Option<String>) -> Result<(), Error> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        if let Some(user_id) = user_id {
            session.set_user_id(user_id);
        }

        match session.start(self.engine.clone(), &self.config).await {
            Ok(()) => Ok(()),
            Err(e @ Error::InvalidState(_)) => Err(e),
            Err(e) => {
                self.end(session_id).await;
                Err(e)
            }
        }
    }

    /// Atomically removes a session from the table without tearing it
    /// down. A concurrent `list` or `get` observes either the live
    /// session or nothing.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Removes the session and tears it down. Removal happens first, so
    /// no caller ever observes a session mid-teardown. Calling `end` for
    /// an unknown identifier is a no-op.
    pub async fn end(&self, session_id: &str) {
        if let Some(session) = self.remove(session_id).await {
            session.shutdown().await;
        }
    }

    /// Ends every live session; used on server shutdown.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<ConversationSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in drained {
            session.shutdown().await;
        }
    }
}

fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "session_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}
