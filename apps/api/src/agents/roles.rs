//! Role resolution. Sources are consulted in priority order and the first
//! one that defines a role wins.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::agent::AgentRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    Membership,
    UserMetadata,
    AppMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedRole {
    pub role: AgentRole,
    pub source: RoleSource,
}

pub fn resolve_role(chain: &[(RoleSource, Option<AgentRole>)]) -> Option<ResolvedRole> {
    chain
        .iter()
        .find_map(|(source, role)| role.map(|role| ResolvedRole { role, source: *source }))
}

pub fn role_chain(
    membership: Option<AgentRole>,
    actor: &Actor,
) -> [(RoleSource, Option<AgentRole>); 3] {
    [
        (RoleSource::Membership, membership),
        (RoleSource::UserMetadata, actor.user_metadata_role),
        (RoleSource::AppMetadata, actor.app_metadata_role),
    ]
}

pub async fn membership_role(
    pool: &PgPool,
    company_id: Uuid,
    user_id: Uuid,
) -> Result<Option<AgentRole>, AppError> {
    let role: Option<String> = sqlx::query_scalar(
        "SELECT role FROM user_companies WHERE user_id = $1 AND company_id = $2",
    )
    .bind(user_id)
    .bind(company_id)
    .fetch_optional(pool)
    .await?;
    Ok(role.and_then(|r| r.parse().ok()))
}

pub async fn resolve_actor_role(pool: &PgPool, actor: &Actor) -> Result<Option<ResolvedRole>, AppError> {
    let membership = membership_role(pool, actor.company_id, actor.user_id).await?;
    Ok(resolve_role(&role_chain(membership, actor)))
}

pub async fn require_admin(pool: &PgPool, actor: &Actor) -> Result<(), AppError> {
    match resolve_actor_role(pool, actor).await? {
        Some(ResolvedRole {
            role: AgentRole::Admin,
            ..
        }) => Ok(()),
        _ => Err(AppError::Forbidden),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(user: Option<AgentRole>, app: Option<AgentRole>) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            name: "Ana".into(),
            user_metadata_role: user,
            app_metadata_role: app,
        }
    }

    #[test]
    fn test_membership_wins() {
        let a = actor(Some(AgentRole::Admin), Some(AgentRole::Admin));
        let resolved = resolve_role(&role_chain(Some(AgentRole::Agent), &a)).unwrap();
        assert_eq!(resolved.role, AgentRole::Agent);
        assert_eq!(resolved.source, RoleSource::Membership);
    }

    #[test]
    fn test_falls_through_to_metadata() {
        let a = actor(None, Some(AgentRole::Admin));
        let resolved = resolve_role(&role_chain(None, &a)).unwrap();
        assert_eq!(resolved.role, AgentRole::Admin);
        assert_eq!(resolved.source, RoleSource::AppMetadata);

        let a = actor(Some(AgentRole::Agent), Some(AgentRole::Admin));
        let resolved = resolve_role(&role_chain(None, &a)).unwrap();
        assert_eq!(resolved.source, RoleSource::UserMetadata);
    }

    #[test]
    fn test_no_source_means_no_role() {
        assert_eq!(resolve_role(&role_chain(None, &actor(None, None))), None);
    }
}
