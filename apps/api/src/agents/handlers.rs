use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::agents::repository::{self, InviteAgent};
use crate::agents::roles::require_admin;
use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::agent::Agent;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentUpdate {
    Activate,
    SetActive { active: bool },
}

/// GET /api/v1/agents
pub async fn handle_list_agents(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<Agent>>, AppError> {
    Ok(Json(repository::list_agents(&state.db, actor.company_id).await?))
}

/// POST /api/v1/agents
pub async fn handle_invite_agent(
    State(state): State<AppState>,
    actor: Actor,
    Json(invite): Json<InviteAgent>,
) -> Result<(StatusCode, Json<Agent>), AppError> {
    require_admin(&state.db, &actor).await?;
    let agent = repository::invite_agent(&state.db, actor.company_id, &invite).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// PATCH /api/v1/agents/:id
pub async fn handle_update_agent(
    State(state): State<AppState>,
    actor: Actor,
    Path(agent_id): Path<Uuid>,
    Json(update): Json<AgentUpdate>,
) -> Result<Json<Agent>, AppError> {
    require_admin(&state.db, &actor).await?;
    let agent = match update {
        AgentUpdate::Activate => {
            repository::activate(&state.db, actor.company_id, agent_id).await?
        }
        AgentUpdate::SetActive { active } => {
            repository::set_active(&state.db, actor.company_id, agent_id, active).await?
        }
    };
    Ok(Json(agent))
}

/// DELETE /api/v1/agents/:id
pub async fn handle_remove_agent(
    State(state): State<AppState>,
    actor: Actor,
    Path(agent_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_admin(&state.db, &actor).await?;
    repository::remove_agent(&state.db, actor.company_id, agent_id, actor.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
