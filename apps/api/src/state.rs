use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use sqlx::PgPool;

use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::realtime::hub::RealtimeHub;
use crate::search::KnowledgeIndex;
use crate::triage::classifier::TicketClassifier;
use crate::webhooks::WebhookRelay;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub s3: S3Client,
    pub config: Config,
    /// Pluggable classifier. Default: KeywordClassifier.
    pub classifier: Arc<dyn TicketClassifier>,
    /// Embedding and vector search backend.
    pub knowledge: Arc<dyn KnowledgeIndex>,
    pub realtime: RealtimeHub,
    pub webhooks: WebhookRelay,
    /// Per-IP limiter for the public lead form.
    pub lead_limiter: Arc<RateLimiter>,
}
