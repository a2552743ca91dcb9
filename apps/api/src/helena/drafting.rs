//! Helena drafts knowledge articles from resolved tickets.
//!
//! The draft is composed from the ticket's problem statement and the agent
//! replies that resolved it. Nothing is published here; every draft waits for
//! a human decision in `curation`.

use std::collections::HashMap;

use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::article::{PendingArticle, SimilarArticle};
use crate::models::ticket::{Ticket, TicketMessage};
use crate::search::semantic::{semantic_search, SearchOptions};
use crate::search::KnowledgeIndex;
use crate::tickets::repository;

const MAX_TITLE_CHARS: usize = 120;
const MAX_KEYWORDS: usize = 8;
const MIN_KEYWORD_CHARS: usize = 4;
const SIMILAR_LIMIT: usize = 3;
const LONG_RESOLUTION_CHARS: usize = 200;

const STOPWORDS: &[&str] = &[
    // pt
    "para", "como", "mais", "está", "esta", "isso", "essa", "esse", "pelo", "pela", "quando",
    "sobre", "também", "ainda", "após", "antes", "muito", "onde", "porque", "qual", "quais",
    "seja", "será", "pode", "podem", "estou", "estamos", "vocês", "você", "nosso", "nossa",
    "favor", "obrigado", "obrigada", "olá", "preciso", "consigo", "fazer", "todos", "todas",
    "apenas", "agora", "depois", "dele", "dela", "foram", "sendo", "tenho", "temos",
    // en
    "with", "this", "that", "from", "have", "there", "their", "what", "when", "which", "would",
    "could", "should", "about", "please", "thanks", "hello", "into", "your", "been", "were",
];

/// Draft content ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedDraft {
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub confidence_score: f64,
}

/// Builds a draft from a ticket and its messages. Returns `None` when no
/// agent wrote anything that could serve as a resolution.
pub fn compose_draft(ticket: &Ticket, messages: &[TicketMessage]) -> Option<ComposedDraft> {
    let resolution: Vec<&str> = messages
        .iter()
        .filter(|m| !m.is_from_client)
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if resolution.is_empty() {
        return None;
    }

    let title: String = ticket.title.trim().chars().take(MAX_TITLE_CHARS).collect();
    let solution = resolution.join("\n\n");
    let content = format!(
        "## Problema\n\n{}\n\n## Solução\n\n{}\n",
        ticket.description.trim(),
        solution
    );

    let corpus = format!("{} {} {}", ticket.title, ticket.description, solution);
    let keywords = extract_keywords(&corpus, MAX_KEYWORDS);

    Some(ComposedDraft {
        title,
        content,
        keywords,
        confidence_score: draft_confidence(resolution.len(), solution.chars().count()),
    })
}

/// 50 points, +10 per resolution reply up to three, +10 for a long resolution.
pub fn draft_confidence(reply_count: usize, resolution_chars: usize) -> f64 {
    let mut points = 50 + 10 * reply_count.min(3) as i64;
    if resolution_chars >= LONG_RESOLUTION_CHARS {
        points += 10;
    }
    points.clamp(0, 100) as f64 / 100.0
}

/// Most frequent words, ties broken alphabetically.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
    {
        *counts.entry(word).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(max).map(|(word, _)| word).collect()
}

/// Creates a pending draft for a resolved ticket.
///
/// Returns `Ok(None)` when the ticket already has a draft or has no agent
/// replies. A failed similarity lookup only drops the similar-article list.
pub async fn draft_from_ticket(
    pool: &PgPool,
    index: &dyn KnowledgeIndex,
    company_id: Uuid,
    ticket_id: Uuid,
) -> Result<Option<PendingArticle>, AppError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM pending_articles WHERE source_ticket_id = $1)",
    )
    .bind(ticket_id)
    .fetch_one(pool)
    .await?;
    if exists {
        return Ok(None);
    }

    let ticket = repository::get_ticket(pool, company_id, ticket_id).await?;
    let messages = repository::list_messages(pool, company_id, ticket_id).await?;
    let Some(draft) = compose_draft(&ticket, &messages) else {
        info!("Ticket {ticket_id} has no agent replies; Helena skipped drafting");
        return Ok(None);
    };

    let options = SearchOptions {
        limit: SIMILAR_LIMIT,
        ..SearchOptions::default()
    };
    let similar: Vec<SimilarArticle> = match semantic_search(index, pool, company_id, &draft.title, &options).await {
        Ok(results) => results
            .into_iter()
            .map(|r| SimilarArticle {
                id: r.article.id,
                title: r.article.title,
                similarity: r.similarity,
            })
            .collect(),
        Err(e) => {
            warn!("Similar-article lookup failed for ticket {ticket_id}: {e}");
            Vec::new()
        }
    };

    let stored: Option<PendingArticle> = sqlx::query_as(
        r#"
        INSERT INTO pending_articles
            (company_id, source_ticket_id, title, content, keywords, confidence_score,
             similar_articles, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
        ON CONFLICT (source_ticket_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(company_id)
    .bind(ticket_id)
    .bind(&draft.title)
    .bind(&draft.content)
    .bind(&draft.keywords)
    .bind(draft.confidence_score)
    .bind(Json(&similar))
    .fetch_optional(pool)
    .await?;

    if let Some(stored) = &stored {
        info!(
            "Helena drafted '{}' from ticket {ticket_id} ({} similar)",
            stored.title,
            similar.len()
        );
    }
    Ok(stored)
}
