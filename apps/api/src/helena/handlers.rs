use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::AppError;
use crate::helena::curation::{self, ApprovalOverrides, ApprovalResult, HelenaStats};
use crate::models::article::PendingArticle;
use crate::state::AppState;
use crate::webhooks::WebhookEvent;

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// GET /api/v1/helena/drafts
pub async fn handle_list_drafts(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<PendingArticle>>, AppError> {
    Ok(Json(curation::list_pending(&state.db, actor.company_id).await?))
}

/// GET /api/v1/helena/stats
pub async fn handle_stats(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<HelenaStats>, AppError> {
    Ok(Json(curation::stats(&state.db, actor.company_id).await?))
}

/// POST /api/v1/helena/drafts/:id/approve
pub async fn handle_approve(
    State(state): State<AppState>,
    actor: Actor,
    Path(draft_id): Path<Uuid>,
    overrides: Option<Json<ApprovalOverrides>>,
) -> Result<Json<ApprovalResult>, AppError> {
    let overrides = overrides.map(|Json(o)| o).unwrap_or_default();
    let result = curation::approve(
        &state.db,
        actor.company_id,
        draft_id,
        actor.user_id,
        overrides,
    )
    .await?;
    curation::index_published(state.knowledge.as_ref(), &result).await;

    state.webhooks.dispatch(
        WebhookEvent::ArticlePublished,
        json!({
            "articleId": result.article_id,
            "draftId": draft_id,
            "companyId": actor.company_id,
            "approvedBy": actor.user_id,
        }),
    );
    Ok(Json(result))
}

/// POST /api/v1/helena/drafts/:id/reject
pub async fn handle_reject(
    State(state): State<AppState>,
    actor: Actor,
    Path(draft_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<PendingArticle>, AppError> {
    let draft = curation::reject(
        &state.db,
        actor.company_id,
        draft_id,
        actor.user_id,
        &req.reason,
    )
    .await?;
    Ok(Json(draft))
}

/// POST /api/v1/helena/drafts/:id/edit
pub async fn handle_begin_edit(
    State(state): State<AppState>,
    actor: Actor,
    Path(draft_id): Path<Uuid>,
) -> Result<Json<PendingArticle>, AppError> {
    Ok(Json(
        curation::begin_editing(&state.db, actor.company_id, draft_id).await?,
    ))
}

/// POST /api/v1/helena/drafts/:id/cancel-edit
pub async fn handle_cancel_edit(
    State(state): State<AppState>,
    actor: Actor,
    Path(draft_id): Path<Uuid>,
) -> Result<Json<PendingArticle>, AppError> {
    Ok(Json(
        curation::cancel_editing(&state.db, actor.company_id, draft_id).await?,
    ))
}
