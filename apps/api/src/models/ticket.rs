use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::text_enum;

text_enum! {
    pub enum TicketStatus {
        New => "new",
        WaitingForClient => "waiting_for_client",
        WaitingForAgent => "waiting_for_agent",
        InProgress => "in_progress",
        Resolved => "resolved",
        Closed => "closed",
    }
}

text_enum! {
    /// Ordered from least to most urgent.
    pub enum TicketPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

text_enum! {
    pub enum TicketCategory {
        TechnicalIssue => "technical_issue",
        FeatureRequest => "feature_request",
        Billing => "billing",
        GeneralInquiry => "general_inquiry",
        Other => "other",
    }
}

text_enum! {
    pub enum TicketSource {
        Web => "web",
        Email => "email",
        Whatsapp => "whatsapp",
    }
}

text_enum! {
    /// Action recorded in `historico_tickets`.
    pub enum HistoryAction {
        Created => "criacao",
        StatusChanged => "status_alterado",
        PriorityChanged => "prioridade_alterada",
        AgentChanged => "agente_alterado",
        AiProcessed => "processado_ia",
        SuggestionApplied => "resposta_aplicada",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub status: TicketStatus,
    #[sqlx(try_from = "String")]
    pub priority: TicketPriority,
    #[sqlx(try_from = "String")]
    pub category: TicketCategory,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub source: TicketSource,
    pub ai_processed: bool,
    pub needs_human_review: bool,
    pub ai_classification: Option<String>,
    pub ai_suggested_priority: Option<String>,
    pub confidence_score: Option<f64>,
    pub sla_first_response_at: Option<DateTime<Utc>>,
    pub sla_resolution_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub author_name: String,
    pub is_from_client: bool,
    pub is_automatic: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub message_id: Option<Uuid>,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketHistoryItem {
    pub id: Uuid,
    pub ticket_id: Uuid,
    #[sqlx(try_from = "String")]
    pub action: HistoryAction,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
