//! Semantic knowledge search.
//!
//! `KnowledgeIndex` is the seam to the vector store. `FunctionsClient` talks to
//! the serverless functions; tests use in-memory fakes.

pub mod functions;
pub mod handlers;
pub mod semantic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

/// One nearest-neighbour hit from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMatch {
    pub id: Uuid,
    pub document_type: String,
    pub similarity: f64,
}

/// A nearest-neighbour query. The store applies the type and threshold
/// filters before counting, so `match_count` hits are all usable.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRequest<'a> {
    pub company_id: Uuid,
    pub embedding: &'a [f32],
    pub document_type: &'a str,
    pub similarity_threshold: f64,
    pub match_count: usize,
}

/// Text to embed and store under a document id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: Uuid,
    pub document_type: String,
    pub company_id: Uuid,
    pub content: String,
}

#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    async fn match_documents(
        &self,
        request: &MatchRequest<'_>,
    ) -> Result<Vec<DocumentMatch>, AppError>;

    /// Embeds `document.content` and stores it, replacing any earlier entry
    /// for the same id.
    async fn index_document(&self, document: &IndexedDocument) -> Result<(), AppError>;
}
