//! Session summaries for the listing endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of one active session, as returned by
/// `GET /conversations`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}
