use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::suggestion::SuggestedResponse;
use crate::models::ticket::{HistoryAction, TicketMessage};
use crate::realtime::events::{notify_change, ChangeEvent, ChangeOp};
use crate::tickets::repository::{self, HistoryEntry, NewMessage};
use crate::triage::classifier::TicketClassifier;
use crate::triage::pipeline::insert_suggestions;

/// Lifecycle of a suggested response, derived from its nullable flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionState {
    Proposed,
    /// Approved but not yet sent. Only reachable through rows written by
    /// older clients; it still accepts `Apply`.
    Approved,
    Applied,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionAction {
    Apply,
    Reject,
}

impl SuggestionState {
    pub fn of(suggestion: &SuggestedResponse) -> Self {
        match (suggestion.approved, suggestion.applied) {
            (_, Some(true)) => SuggestionState::Applied,
            (Some(false), _) => SuggestionState::Rejected,
            (Some(true), _) => SuggestionState::Approved,
            (None, _) => SuggestionState::Proposed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SuggestionState::Applied | SuggestionState::Rejected)
    }

    /// Whether the suggestion still belongs in the agent's pending list.
    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }

    pub fn transition(self, action: SuggestionAction) -> Result<SuggestionState, AppError> {
        match (self, action) {
            (SuggestionState::Proposed | SuggestionState::Approved, SuggestionAction::Apply) => {
                Ok(SuggestionState::Applied)
            }
            (SuggestionState::Proposed, SuggestionAction::Reject) => Ok(SuggestionState::Rejected),
            (state, action) => Err(AppError::Conflict(format!(
                "Cannot {action:?} a suggestion that is {state:?}"
            ))),
        }
    }
}

/// Keeps only suggestions an agent can still act on.
pub fn retain_pending(suggestions: Vec<SuggestedResponse>) -> Vec<SuggestedResponse> {
    suggestions
        .into_iter()
        .filter(|s| SuggestionState::of(s).is_pending())
        .collect()
}

#[derive(Debug, Serialize)]
pub struct AppliedSuggestion {
    pub suggestion: SuggestedResponse,
    pub message: TicketMessage,
}

/// Writes behind the apply and reject decisions, all inside one unit of work.
///
/// `mark_applied` and `mark_rejected` are guarded: they return `None` when
/// the row was decided by someone else after it was read.
#[async_trait]
pub trait SuggestionStore: Send {
    async fn lock(&mut self, company_id: Uuid, suggestion_id: Uuid)
        -> Result<SuggestedResponse, AppError>;

    async fn mark_applied(
        &mut self,
        suggestion_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<SuggestedResponse>, AppError>;

    async fn mark_rejected(&mut self, suggestion_id: Uuid)
        -> Result<Option<SuggestedResponse>, AppError>;

    /// Posts the suggestion text as an automatic agent reply.
    async fn post_reply(
        &mut self,
        suggestion: &SuggestedResponse,
        agent_id: Uuid,
        agent_name: &str,
    ) -> Result<TicketMessage, AppError>;

    /// History entry, ticket touch and change notifications for an applied reply.
    async fn record_applied(
        &mut self,
        suggestion: &SuggestedResponse,
        agent_id: Uuid,
    ) -> Result<(), AppError>;

    async fn record_rejected(&mut self, suggestion: &SuggestedResponse) -> Result<(), AppError>;
}

pub async fn apply_with<S: SuggestionStore>(
    store: &mut S,
    company_id: Uuid,
    suggestion_id: Uuid,
    agent_id: Uuid,
    agent_name: &str,
) -> Result<AppliedSuggestion, AppError> {
    let current = store.lock(company_id, suggestion_id).await?;
    SuggestionState::of(&current).transition(SuggestionAction::Apply)?;

    let suggestion = store
        .mark_applied(suggestion_id, agent_id)
        .await?
        .ok_or_else(|| already_decided(suggestion_id))?;
    let message = store.post_reply(&suggestion, agent_id, agent_name).await?;
    store.record_applied(&suggestion, agent_id).await?;

    Ok(AppliedSuggestion {
        suggestion,
        message,
    })
}

pub async fn reject_with<S: SuggestionStore>(
    store: &mut S,
    company_id: Uuid,
    suggestion_id: Uuid,
) -> Result<SuggestedResponse, AppError> {
    let current = store.lock(company_id, suggestion_id).await?;
    SuggestionState::of(&current).transition(SuggestionAction::Reject)?;

    let suggestion = store
        .mark_rejected(suggestion_id)
        .await?
        .ok_or_else(|| already_decided(suggestion_id))?;
    store.record_rejected(&suggestion).await?;
    Ok(suggestion)
}

pub async fn list_pending(
    pool: &PgPool,
    company_id: Uuid,
    ticket_id: Uuid,
) -> Result<Vec<SuggestedResponse>, AppError> {
    repository::get_ticket(pool, company_id, ticket_id).await?;
    let rows = sqlx::query_as::<_, SuggestedResponse>(
        r#"
        SELECT * FROM suggested_responses
        WHERE ticket_id = $1
          AND approved IS DISTINCT FROM false
          AND applied IS DISTINCT FROM true
        ORDER BY confidence DESC, created_at ASC
        "#,
    )
    .bind(ticket_id)
    .fetch_all(pool)
    .await?;
    Ok(retain_pending(rows))
}

/// Sends the suggestion as an agent reply and marks it applied, atomically.
pub async fn apply(
    pool: &PgPool,
    company_id: Uuid,
    suggestion_id: Uuid,
    agent_id: Uuid,
    agent_name: &str,
) -> Result<AppliedSuggestion, AppError> {
    let mut store = PgSuggestionStore::begin(pool).await?;
    let applied = apply_with(&mut store, company_id, suggestion_id, agent_id, agent_name).await?;
    store.commit().await?;
    info!("Suggestion {suggestion_id} applied by agent {agent_id}");
    Ok(applied)
}

/// Marks a suggestion rejected. The row is kept as model feedback.
pub async fn reject(
    pool: &PgPool,
    company_id: Uuid,
    suggestion_id: Uuid,
    agent_id: Uuid,
) -> Result<SuggestedResponse, AppError> {
    let mut store = PgSuggestionStore::begin(pool).await?;
    let rejected = reject_with(&mut store, company_id, suggestion_id).await?;
    store.commit().await?;
    info!("Suggestion {suggestion_id} rejected by agent {agent_id}");
    Ok(rejected)
}

/// Runs the classifier again and appends fresh suggestions; earlier ones are untouched.
pub async fn regenerate(
    pool: &PgPool,
    classifier: &dyn TicketClassifier,
    company_id: Uuid,
    ticket_id: Uuid,
) -> Result<Vec<SuggestedResponse>, AppError> {
    let ticket = repository::get_ticket(pool, company_id, ticket_id).await?;
    let classification = classifier
        .classify(&ticket.title, &ticket.description)
        .await
        .map_err(|e| AppError::Ai(format!("Failed to regenerate suggestions: {e}")))?;

    let mut tx = pool.begin().await?;
    let inserted = insert_suggestions(&mut tx, ticket_id, &classification.suggested_responses).await?;
    tx.commit().await?;
    Ok(inserted)
}

fn already_decided(suggestion_id: Uuid) -> AppError {
    AppError::Conflict(format!("Suggestion {suggestion_id} was already handled"))
}

/// `SuggestionStore` over one Postgres transaction.
pub struct PgSuggestionStore {
    tx: Transaction<'static, Postgres>,
}

impl PgSuggestionStore {
    pub async fn begin(pool: &PgPool) -> Result<Self, AppError> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SuggestionStore for PgSuggestionStore {
    async fn lock(
        &mut self,
        company_id: Uuid,
        suggestion_id: Uuid,
    ) -> Result<SuggestedResponse, AppError> {
        sqlx::query_as::<_, SuggestedResponse>(
            r#"
            SELECT s.* FROM suggested_responses s
            JOIN tickets t ON t.id = s.ticket_id
            WHERE s.id = $1 AND t.company_id = $2
            FOR UPDATE OF s
            "#,
        )
        .bind(suggestion_id)
        .bind(company_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Suggestion {suggestion_id} not found")))
    }

    async fn mark_applied(
        &mut self,
        suggestion_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<SuggestedResponse>, AppError> {
        Ok(sqlx::query_as(
            r#"
            UPDATE suggested_responses
            SET approved = true, applied = true, applied_by = $2, applied_at = now()
            WHERE id = $1
              AND approved IS DISTINCT FROM false
              AND applied IS DISTINCT FROM true
            RETURNING *
            "#,
        )
        .bind(suggestion_id)
        .bind(agent_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn mark_rejected(
        &mut self,
        suggestion_id: Uuid,
    ) -> Result<Option<SuggestedResponse>, AppError> {
        Ok(sqlx::query_as(
            r#"
            UPDATE suggested_responses SET approved = false
            WHERE id = $1 AND approved IS NULL AND applied IS DISTINCT FROM true
            RETURNING *
            "#,
        )
        .bind(suggestion_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn post_reply(
        &mut self,
        suggestion: &SuggestedResponse,
        agent_id: Uuid,
        agent_name: &str,
    ) -> Result<TicketMessage, AppError> {
        Ok(repository::insert_message(
            &mut self.tx,
            suggestion.ticket_id,
            &NewMessage {
                content: &suggestion.message,
                author_id: Some(agent_id),
                author_name: agent_name,
                is_from_client: false,
                is_automatic: true,
            },
        )
        .await?)
    }

    async fn record_applied(
        &mut self,
        suggestion: &SuggestedResponse,
        agent_id: Uuid,
    ) -> Result<(), AppError> {
        let suggestion_ref = suggestion.id.to_string();
        repository::record_history(
            &mut self.tx,
            HistoryEntry {
                ticket_id: suggestion.ticket_id,
                action: HistoryAction::SuggestionApplied,
                previous_value: None,
                new_value: Some(suggestion_ref.as_str()),
                user_id: Some(agent_id),
            },
        )
        .await?;
        sqlx::query("UPDATE tickets SET updated_at = now() WHERE id = $1")
            .bind(suggestion.ticket_id)
            .execute(&mut *self.tx)
            .await?;

        let ticket_id = suggestion.ticket_id;
        notify_change(
            &mut self.tx,
            &ChangeEvent::suggestions_changed(ticket_id, ChangeOp::Update),
        )
        .await?;
        notify_change(&mut self.tx, &ChangeEvent::history_inserted(ticket_id, None)).await?;
        notify_change(&mut self.tx, &ChangeEvent::ticket_updated(ticket_id, None)).await?;
        Ok(())
    }

    async fn record_rejected(&mut self, suggestion: &SuggestedResponse) -> Result<(), AppError> {
        notify_change(
            &mut self.tx,
            &ChangeEvent::suggestions_changed(suggestion.ticket_id, ChangeOp::Update),
        )
        .await?;
        Ok(())
    }
}
