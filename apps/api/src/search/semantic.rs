use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::article::KnowledgeArticle;
use crate::search::{DocumentMatch, KnowledgeIndex, MatchRequest};

pub const KNOWLEDGE_ARTICLE: &str = "knowledge_article";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub similarity_threshold: f64,
    pub limit: usize,
    pub document_type: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            limit: 5,
            document_type: KNOWLEDGE_ARTICLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub article: KnowledgeArticle,
    pub similarity: f64,
    /// `similarity` as a 0-100 score for display.
    pub relevance_score: u32,
}

pub fn relevance_score(similarity: f64) -> u32 {
    (similarity.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Keeps matches of the wanted type at or above the threshold, best first.
pub fn rank_matches(matches: Vec<DocumentMatch>, options: &SearchOptions) -> Vec<DocumentMatch> {
    let mut kept: Vec<DocumentMatch> = matches
        .into_iter()
        .filter(|m| m.document_type == options.document_type)
        .filter(|m| m.similarity >= options.similarity_threshold)
        .collect();
    kept.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    kept
}

/// Joins ranked matches with their rows, preserving rank. Matches without a
/// row (deleted or from another company) are dropped before the limit applies.
pub fn assemble(
    ranked: Vec<DocumentMatch>,
    articles: Vec<KnowledgeArticle>,
    limit: usize,
) -> Vec<SearchResult> {
    let mut by_id: HashMap<Uuid, KnowledgeArticle> =
        articles.into_iter().map(|a| (a.id, a)).collect();
    ranked
        .into_iter()
        .filter_map(|m| {
            by_id.remove(&m.id).map(|article| SearchResult {
                article,
                similarity: m.similarity,
                relevance_score: relevance_score(m.similarity),
            })
        })
        .take(limit)
        .collect()
}

/// Embeds the query and returns the ranked matches worth hydrating.
pub async fn find_matches(
    index: &dyn KnowledgeIndex,
    company_id: Uuid,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<DocumentMatch>, AppError> {
    let query = query.trim();
    if query.is_empty() || options.limit == 0 {
        return Ok(Vec::new());
    }

    let embedding = index.embed(query).await?;
    // Headroom for matches whose rows were deleted since they were indexed.
    let matches = index
        .match_documents(&MatchRequest {
            company_id,
            embedding: &embedding,
            document_type: &options.document_type,
            similarity_threshold: options.similarity_threshold,
            match_count: options.limit * 2,
        })
        .await?;
    let ranked = rank_matches(matches, options);
    debug!("Semantic search kept {} match(es) for company {company_id}", ranked.len());
    Ok(ranked)
}

pub async fn semantic_search(
    index: &dyn KnowledgeIndex,
    pool: &PgPool,
    company_id: Uuid,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchResult>, AppError> {
    let ranked = find_matches(index, company_id, query, options).await?;
    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = ranked.iter().map(|m| m.id).collect();
    let articles = sqlx::query_as::<_, KnowledgeArticle>(
        "SELECT * FROM knowledge_articles WHERE company_id = $1 AND id = ANY($2)",
    )
    .bind(company_id)
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    Ok(assemble(ranked, articles, options.limit))
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::search::IndexedDocument;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a fixed set of matches for any query and keeps the last request.
    pub struct FixedIndex {
        pub matches: Vec<DocumentMatch>,
        pub last_request: Mutex<Option<(String, f64, usize)>>,
    }

    impl FixedIndex {
        pub fn new(matches: Vec<DocumentMatch>) -> Self {
            Self {
                matches,
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl KnowledgeIndex for FixedIndex {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![text.len() as f32])
        }

        async fn match_documents(
            &self,
            request: &MatchRequest<'_>,
        ) -> Result<Vec<DocumentMatch>, AppError> {
            *self.last_request.lock().unwrap() = Some((
                request.document_type.to_string(),
                request.similarity_threshold,
                request.match_count,
            ));
            Ok(self.matches.clone())
        }

        async fn index_document(&self, _document: &IndexedDocument) -> Result<(), AppError> {
            Ok(())
        }
    }

    /// Stores indexed documents and matches by shared words: similarity is
    /// the share of query words found in the document.
    #[derive(Default)]
    pub struct MemoryIndex {
        pub documents: Mutex<Vec<IndexedDocument>>,
        queries: Mutex<Vec<String>>,
    }

    fn words(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    #[async_trait]
    impl KnowledgeIndex for MemoryIndex {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
            let mut queries = self.queries.lock().unwrap();
            queries.push(text.to_string());
            Ok(vec![(queries.len() - 1) as f32])
        }

        async fn match_documents(
            &self,
            request: &MatchRequest<'_>,
        ) -> Result<Vec<DocumentMatch>, AppError> {
            let slot = request.embedding.first().copied().unwrap_or_default() as usize;
            let query = words(&self.queries.lock().unwrap()[slot]);
            let mut hits: Vec<DocumentMatch> = self
                .documents
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.company_id == request.company_id)
                .filter(|d| d.document_type == request.document_type)
                .map(|d| {
                    let content = words(&d.content);
                    let shared = query.iter().filter(|w| content.contains(w)).count();
                    DocumentMatch {
                        id: d.id,
                        document_type: d.document_type.clone(),
                        similarity: shared as f64 / query.len().max(1) as f64,
                    }
                })
                .filter(|m| m.similarity >= request.similarity_threshold)
                .collect();
            hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            hits.truncate(request.match_count);
            Ok(hits)
        }

        async fn index_document(&self, document: &IndexedDocument) -> Result<(), AppError> {
            let mut documents = self.documents.lock().unwrap();
            documents.retain(|d| d.id != document.id);
            documents.push(document.clone());
            Ok(())
        }
    }
}
