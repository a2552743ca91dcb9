use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::text_enum;

text_enum! {
    pub enum DraftStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Editing => "editing",
    }
}

/// An existing article Helena found close to a draft.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarArticle {
    pub id: Uuid,
    pub title: String,
    pub similarity: f64,
}

/// A Helena-authored knowledge-base draft awaiting a decision.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingArticle {
    pub id: Uuid,
    pub company_id: Uuid,
    pub source_ticket_id: Option<Uuid>,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub confidence_score: f64,
    pub similar_articles: Json<Vec<SimilarArticle>>,
    #[sqlx(try_from = "String")]
    pub status: DraftStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub published_article_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KnowledgeArticle {
    pub id: Uuid,
    pub company_id: Uuid,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
