//! Classification pipeline: runs the classifier over a ticket and persists
//! its output.
//!
//! Flow: fetch ticket → classify → (one transaction) mark AI fields, insert
//! suggestions, append history, notify. A failure anywhere rolls the whole
//! unit back, so a ticket is never left half-processed.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::suggestion::SuggestedResponse;
use crate::models::ticket::{HistoryAction, Ticket};
use crate::realtime::events::{notify_change, ChangeEvent, ChangeOp};
use crate::tickets::repository::{self, HistoryEntry};
use crate::triage::classifier::{CandidateResponse, Classification, TicketClassifier};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub ticket: Ticket,
    pub classification: Classification,
    pub suggestions: Vec<SuggestedResponse>,
}

pub async fn process_ticket(
    pool: &PgPool,
    classifier: &dyn TicketClassifier,
    company_id: Uuid,
    ticket_id: Uuid,
    actor_id: Option<Uuid>,
) -> Result<ProcessOutcome, AppError> {
    let ticket = repository::get_ticket(pool, company_id, ticket_id).await?;
    let classification = classify_ticket(classifier, &ticket).await?;
    persist_classification(pool, &ticket, classification, classifier.backend(), actor_id).await
}

/// Runs the classifier over a ticket's text. Nothing is written.
pub async fn classify_ticket(
    classifier: &dyn TicketClassifier,
    ticket: &Ticket,
) -> Result<Classification, AppError> {
    classifier
        .classify(&ticket.title, &ticket.description)
        .await
        .map_err(|e| {
            warn!("Classification failed for ticket {}: {e}", ticket.id);
            AppError::Ai(format!("Failed to classify ticket {}: {e}", ticket.id))
        })
}

/// Stores a classification and its suggestions in one transaction.
pub async fn persist_classification(
    pool: &PgPool,
    ticket: &Ticket,
    classification: Classification,
    backend: &str,
    actor_id: Option<Uuid>,
) -> Result<ProcessOutcome, AppError> {
    let (ticket_id, company_id) = (ticket.id, ticket.company_id);
    let mut tx = pool.begin().await?;

    let ticket: Ticket = sqlx::query_as(
        r#"
        UPDATE tickets
        SET ai_processed = true,
            needs_human_review = $3,
            ai_classification = $4,
            ai_suggested_priority = $5,
            confidence_score = $6,
            updated_at = now()
        WHERE id = $1 AND company_id = $2
        RETURNING *
        "#,
    )
    .bind(ticket_id)
    .bind(company_id)
    .bind(classification.needs_human_review())
    .bind(classification.classification.as_str())
    .bind(classification.suggested_priority.as_str())
    .bind(classification.confidence_score)
    .fetch_one(&mut *tx)
    .await?;

    let suggestions =
        insert_suggestions(&mut tx, ticket_id, &classification.suggested_responses).await?;

    let summary = format!(
        "{} / {} ({:.2}) via {}",
        classification.classification,
        classification.suggested_priority,
        classification.confidence_score,
        backend
    );
    repository::record_history(
        &mut tx,
        HistoryEntry {
            ticket_id,
            action: HistoryAction::AiProcessed,
            previous_value: None,
            new_value: Some(summary.as_str()),
            user_id: actor_id,
        },
    )
    .await?;

    notify_change(&mut tx, &ChangeEvent::ticket_updated(ticket_id, None)).await?;
    notify_change(&mut tx, &ChangeEvent::history_inserted(ticket_id, None)).await?;

    tx.commit().await?;

    info!(
        "Ticket {ticket_id} classified as {} with {} suggestion(s), review={}",
        classification.classification,
        suggestions.len(),
        ticket.needs_human_review
    );

    Ok(ProcessOutcome {
        ticket,
        classification,
        suggestions,
    })
}

/// Inserts a batch of suggestions and queues one notification for the batch.
pub async fn insert_suggestions(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    candidates: &[CandidateResponse],
) -> Result<Vec<SuggestedResponse>, sqlx::Error> {
    let mut inserted = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let row: SuggestedResponse = sqlx::query_as(
            r#"
            INSERT INTO suggested_responses (ticket_id, message, confidence)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(ticket_id)
        .bind(&candidate.message)
        .bind(candidate.confidence)
        .fetch_one(&mut *conn)
        .await?;
        inserted.push(row);
    }
    if !inserted.is_empty() {
        notify_change(conn, &ChangeEvent::suggestions_changed(ticket_id, ChangeOp::Insert)).await?;
    }
    Ok(inserted)
}
