use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::suggestion::SuggestedResponse;
use crate::state::AppState;
use crate::triage::pipeline::{process_ticket, ProcessOutcome};
use crate::triage::suggestions::{self, AppliedSuggestion};

/// POST /api/v1/tickets/:id/classify
pub async fn handle_classify(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<ProcessOutcome>, AppError> {
    let outcome = process_ticket(
        &state.db,
        state.classifier.as_ref(),
        actor.company_id,
        ticket_id,
        Some(actor.user_id),
    )
    .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/tickets/:id/suggestions
pub async fn handle_list_suggestions(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<SuggestedResponse>>, AppError> {
    let pending = suggestions::list_pending(&state.db, actor.company_id, ticket_id).await?;
    Ok(Json(pending))
}

/// POST /api/v1/tickets/:id/suggestions/regenerate
pub async fn handle_regenerate_suggestions(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<SuggestedResponse>>, AppError> {
    let fresh = suggestions::regenerate(
        &state.db,
        state.classifier.as_ref(),
        actor.company_id,
        ticket_id,
    )
    .await?;
    Ok(Json(fresh))
}

/// POST /api/v1/suggestions/:id/apply
pub async fn handle_apply_suggestion(
    State(state): State<AppState>,
    actor: Actor,
    Path(suggestion_id): Path<Uuid>,
) -> Result<Json<AppliedSuggestion>, AppError> {
    let applied = suggestions::apply(
        &state.db,
        actor.company_id,
        suggestion_id,
        actor.user_id,
        &actor.name,
    )
    .await?;
    Ok(Json(applied))
}

/// POST /api/v1/suggestions/:id/reject
pub async fn handle_reject_suggestion(
    State(state): State<AppState>,
    actor: Actor,
    Path(suggestion_id): Path<Uuid>,
) -> Result<Json<SuggestedResponse>, AppError> {
    let rejected =
        suggestions::reject(&state.db, actor.company_id, suggestion_id, actor.user_id).await?;
    Ok(Json(rejected))
}
