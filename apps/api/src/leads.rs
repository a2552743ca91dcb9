//! Public lead intake from the marketing site.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::ratelimit::RateLimiter;
use crate::state::AppState;
use crate::webhooks::WebhookEvent;

const MAX_NAME_CHARS: usize = 120;
const MAX_MESSAGE_CHARS: usize = 5000;

#[derive(Debug, Clone, Deserialize)]
pub struct LeadRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Honeypot. Hidden in the form; only bots fill it in.
    #[serde(default)]
    pub website: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LeadReceipt {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<Uuid>,
}

impl LeadRequest {
    pub fn is_bot(&self) -> bool {
        self.website
            .as_deref()
            .is_some_and(|w| !w.trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Nome é obrigatório".into()));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(AppError::Validation("Nome muito longo".into()));
        }
        if !is_plausible_email(self.email.trim()) {
            return Err(AppError::Validation("E-mail inválido".into()));
        }
        if self
            .message
            .as_deref()
            .is_some_and(|m| m.chars().count() > MAX_MESSAGE_CHARS)
        {
            return Err(AppError::Validation("Mensagem muito longa".into()));
        }
        Ok(())
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !email.contains(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Client address for rate limiting.
///
/// With no trusted proxies the socket peer is the client and `X-Forwarded-For`
/// is ignored. Behind `trusted_hops` proxies, each of which appends the address
/// it received from, the client is the right-most hop those proxies did not
/// add. Entries further left are supplied by the caller and never used.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> String {
    let peer_ip = || {
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    };
    if trusted_hops == 0 {
        return peer_ip();
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();
    match hops.len().checked_sub(trusted_hops) {
        Some(i) => hops[i].to_string(),
        None => peer_ip(),
    }
}

/// Counts the attempt against `ip`, failing with the remaining block time once limited.
pub fn enforce_limit(limiter: &RateLimiter, ip: &str) -> Result<(), AppError> {
    if limiter.record_attempt(ip) {
        return Ok(());
    }
    let retry_after_secs = limiter
        .retry_after(ip)
        .map(|d| d.as_secs().max(1))
        .unwrap_or(60);
    warn!("Lead submissions from {ip} blocked for {retry_after_secs}s");
    Err(AppError::RateLimited { retry_after_secs })
}

/// POST /api/v1/leads
pub async fn handle_create_lead(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<LeadRequest>,
) -> Result<Json<LeadReceipt>, AppError> {
    let ip = client_ip(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        state.config.trusted_proxy_hops,
    );
    enforce_limit(&state.lead_limiter, &ip)?;

    if req.is_bot() {
        info!("Honeypot triggered from {ip}; lead discarded");
        return Ok(Json(LeadReceipt {
            success: true,
            lead_id: None,
        }));
    }
    req.validate()?;

    let company_name = req.company_name.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let lead_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO leads (name, email, company_name, message, source_ip)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(req.name.trim())
    .bind(req.email.trim().to_lowercase())
    .bind(company_name)
    .bind(req.message.as_deref())
    .bind(&ip)
    .fetch_one(&state.db)
    .await?;

    info!("Lead {lead_id} received");
    state.webhooks.dispatch(
        WebhookEvent::LeadCreated,
        json!({
            "leadId": lead_id,
            "name": req.name.trim(),
            "email": req.email.trim().to_lowercase(),
            "companyName": company_name,
            "message": req.message,
        }),
    );

    Ok(Json(LeadReceipt {
        success: true,
        lead_id: Some(lead_id),
    }))
}
