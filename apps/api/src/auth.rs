use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::agent::AgentRole;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const COMPANY_ID_HEADER: &str = "x-company-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_METADATA_ROLE_HEADER: &str = "x-user-metadata-role";
pub const APP_METADATA_ROLE_HEADER: &str = "x-app-metadata-role";

/// The authenticated caller, as forwarded by the auth gateway.
///
/// Every tenant-scoped handler takes an `Actor`; its `company_id` is the only
/// company the request may read or write.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    /// Role claims carried on the session. Membership rows take precedence,
    /// see `agents::roles`.
    pub user_metadata_role: Option<AgentRole>,
    pub app_metadata_role: Option<AgentRole>,
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = uuid_header(parts, USER_ID_HEADER)?;
        let company_id = uuid_header(parts, COMPANY_ID_HEADER)?;
        let name = header_str(parts, USER_NAME_HEADER)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("Agente")
            .to_string();

        Ok(Actor {
            user_id,
            company_id,
            name,
            user_metadata_role: role_header(parts, USER_METADATA_ROLE_HEADER),
            app_metadata_role: role_header(parts, APP_METADATA_ROLE_HEADER),
        })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn uuid_header(parts: &Parts, name: &str) -> Result<Uuid, AppError> {
    header_str(parts, name)
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or(AppError::Unauthorized)
}

// Unknown role strings are treated as absent so the next source can decide.
fn role_header(parts: &Parts, name: &str) -> Option<AgentRole> {
    header_str(parts, name).and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(builder: axum::http::request::Builder) -> Result<Actor, AppError> {
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_extracts_actor_from_headers() {
        let user = Uuid::new_v4();
        let company = Uuid::new_v4();
        let actor = extract(
            Request::builder()
                .header(USER_ID_HEADER, user.to_string())
                .header(COMPANY_ID_HEADER, company.to_string())
                .header(USER_NAME_HEADER, "Ana")
                .header(APP_METADATA_ROLE_HEADER, "admin"),
        )
        .await
        .unwrap();
        assert_eq!(actor.user_id, user);
        assert_eq!(actor.company_id, company);
        assert_eq!(actor.name, "Ana");
        assert_eq!(actor.user_metadata_role, None);
        assert_eq!(actor.app_metadata_role, Some(AgentRole::Admin));
    }

    #[tokio::test]
    async fn test_missing_company_is_unauthorized() {
        let err = extract(Request::builder().header(USER_ID_HEADER, Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn test_unknown_role_claim_is_ignored() {
        let actor = extract(
            Request::builder()
                .header(USER_ID_HEADER, Uuid::new_v4().to_string())
                .header(COMPANY_ID_HEADER, Uuid::new_v4().to_string())
                .header(USER_METADATA_ROLE_HEADER, "superuser"),
        )
        .await
        .unwrap();
        assert_eq!(actor.user_metadata_role, None);
        assert_eq!(actor.name, "Agente");
    }
}
