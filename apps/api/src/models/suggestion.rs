use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An AI-proposed reply attached to a ticket.
///
/// `approved` and `applied` are nullable: both null means the suggestion is
/// still proposed. See `triage::suggestions::SuggestionState`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SuggestedResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub message: String,
    pub confidence: f64,
    pub approved: Option<bool>,
    pub applied: Option<bool>,
    pub applied_by: Option<Uuid>,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
