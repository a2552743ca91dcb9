use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::agent::{Agent, AgentRole, AgentStatus};

const NOT_SIGNED_UP: &str =
    "Este usuário ainda não possui conta. Peça para ele se cadastrar primeiro.";

#[derive(Debug, Clone, Deserialize)]
pub struct InviteAgent {
    pub user_id: Uuid,
    #[serde(default = "default_role")]
    pub role: AgentRole,
}

fn default_role() -> AgentRole {
    AgentRole::Agent
}

/// Validates a membership status change. `Ok(false)` means nothing to do.
///
/// Awaiting members can only be activated; active and inactive toggle.
/// Nobody moves back to awaiting activation.
pub fn plan_status_change(current: AgentStatus, target: AgentStatus) -> Result<bool, AppError> {
    use AgentStatus::*;
    match (current, target) {
        (a, b) if a == b => Ok(false),
        (AwaitingActivation, Active) | (Active, Inactive) | (Inactive, Active) => Ok(true),
        (_, AwaitingActivation) => Err(AppError::Validation(
            "An agent cannot be returned to awaiting activation".into(),
        )),
        (from, to) => Err(AppError::Conflict(format!(
            "Agent status cannot change from {from} to {to}"
        ))),
    }
}

pub async fn list_agents(pool: &PgPool, company_id: Uuid) -> Result<Vec<Agent>, AppError> {
    Ok(sqlx::query_as::<_, Agent>(
        "SELECT * FROM agents_view WHERE company_id = $1 ORDER BY name ASC",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?)
}

pub async fn get_agent(pool: &PgPool, company_id: Uuid, agent_id: Uuid) -> Result<Agent, AppError> {
    sqlx::query_as::<_, Agent>("SELECT * FROM agents_view WHERE id = $1 AND company_id = $2")
        .bind(agent_id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Agent {agent_id} not found")))
}

/// Adds an existing user to the company, awaiting activation.
pub async fn invite_agent(
    pool: &PgPool,
    company_id: Uuid,
    invite: &InviteAgent,
) -> Result<Agent, AppError> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO user_companies (user_id, company_id, role, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, company_id) DO NOTHING
        "#,
    )
    .bind(invite.user_id)
    .bind(company_id)
    .bind(invite.role.as_str())
    .bind(AgentStatus::AwaitingActivation.as_str())
    .execute(pool)
    .await
    .map_err(|e| AppError::from_db(e, NOT_SIGNED_UP))?;

    if inserted.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "User {} is already a member of this company",
            invite.user_id
        )));
    }
    info!("Invited user {} to company {company_id} as {}", invite.user_id, invite.role);
    get_agent(pool, company_id, invite.user_id).await
}

pub async fn set_status(
    pool: &PgPool,
    company_id: Uuid,
    agent_id: Uuid,
    target: AgentStatus,
) -> Result<Agent, AppError> {
    let agent = get_agent(pool, company_id, agent_id).await?;
    if !plan_status_change(agent.status, target)? {
        return Ok(agent);
    }

    // Guarded on the status we validated against.
    let updated = sqlx::query(
        "UPDATE user_companies SET status = $3 WHERE user_id = $1 AND company_id = $2 AND status = $4",
    )
    .bind(agent_id)
    .bind(company_id)
    .bind(target.as_str())
    .bind(agent.status.as_str())
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "Agent {agent_id} changed concurrently; reload and retry"
        )));
    }
    info!("Agent {agent_id}: {} -> {target}", agent.status);
    get_agent(pool, company_id, agent_id).await
}

pub async fn activate(pool: &PgPool, company_id: Uuid, agent_id: Uuid) -> Result<Agent, AppError> {
    let agent = get_agent(pool, company_id, agent_id).await?;
    if agent.status != AgentStatus::AwaitingActivation {
        return Err(AppError::Conflict(format!(
            "Agent {agent_id} is not awaiting activation"
        )));
    }
    set_status(pool, company_id, agent_id, AgentStatus::Active).await
}

pub async fn set_active(
    pool: &PgPool,
    company_id: Uuid,
    agent_id: Uuid,
    active: bool,
) -> Result<Agent, AppError> {
    let target = if active {
        AgentStatus::Active
    } else {
        AgentStatus::Inactive
    };
    set_status(pool, company_id, agent_id, target).await
}

/// Removes the membership only; the user account and ticket history stay.
pub async fn remove_agent(
    pool: &PgPool,
    company_id: Uuid,
    agent_id: Uuid,
    removed_by: Uuid,
) -> Result<(), AppError> {
    if agent_id == removed_by {
        return Err(AppError::Validation(
            "You cannot remove yourself from the company".into(),
        ));
    }
    let deleted = sqlx::query("DELETE FROM user_companies WHERE user_id = $1 AND company_id = $2")
        .bind(agent_id)
        .bind(company_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Agent {agent_id} not found")));
    }
    info!("Removed agent {agent_id} from company {company_id}");
    Ok(())
}
