mod agents;
mod auth;
mod config;
mod db;
mod errors;
mod helena;
mod leads;
mod models;
mod ratelimit;
mod realtime;
mod routes;
mod search;
mod state;
mod tickets;
mod triage;
mod webhooks;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::ratelimit::{spawn_sweeper, RateLimitConfig, RateLimiter};
use crate::realtime::hub::{spawn_change_listener, RealtimeHub};
use crate::routes::build_router;
use crate::search::functions::FunctionsClient;
use crate::search::KnowledgeIndex;
use crate::state::AppState;
use crate::triage::classifier::{KeywordClassifier, TicketClassifier};
use crate::webhooks::{spawn_retry_worker, WebhookRelay};

const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Solveflow API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;

    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    let classifier: Arc<dyn TicketClassifier> = Arc::new(KeywordClassifier::with_latency(
        Duration::from_millis(config.classifier_latency_ms),
    ));
    info!("Ticket classifier: {}", classifier.backend());

    let knowledge: Arc<dyn KnowledgeIndex> = Arc::new(FunctionsClient::new(
        &config.functions_url,
        config.functions_api_key.clone(),
    )?);
    info!("Functions client initialized ({})", config.functions_url);

    let webhooks = WebhookRelay::new(db.clone(), config.n8n_webhook_url.clone())?;
    if webhooks.is_enabled() {
        info!("Webhook relay enabled");
    }

    let realtime = RealtimeHub::new();
    spawn_change_listener(db.clone(), realtime.clone());
    spawn_retry_worker(webhooks.clone());

    let lead_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    spawn_sweeper(lead_limiter.clone(), LIMITER_SWEEP_INTERVAL);

    let state = AppState {
        db,
        s3,
        config: config.clone(),
        classifier,
        knowledge,
        realtime,
        webhooks,
        lead_limiter,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the dashboard domains

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Peer addresses feed the lead limiter when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "solveflow-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
