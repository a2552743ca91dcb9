use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::text_enum;

text_enum! {
    pub enum AgentRole {
        Admin => "admin",
        Agent => "agent",
    }
}

text_enum! {
    pub enum AgentStatus {
        Active => "active",
        Inactive => "inactive",
        AwaitingActivation => "awaiting_activation",
    }
}

/// Row of `agents_view`: a company membership joined with the user profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: AgentRole,
    #[sqlx(try_from = "String")]
    pub status: AgentStatus,
}
