//! Outbound automation webhooks.
//!
//! Every delivery attempt is written to `n8n_integration_logs`. A failed
//! attempt is scheduled for one retry five minutes later; the retry worker
//! picks it up on its next tick and never schedules another.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::{FromRow, PgPool};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::text_enum;

pub const SOURCE: &str = "solveflow";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY_MINUTES: i64 = 5;
const RETRY_TICK: Duration = Duration::from_secs(60);
const MAX_LOGGED_BODY_CHARS: usize = 2000;
const RETRY_BATCH: i64 = 50;
// Longer than a batch of sends can take at the request timeout.
const RETRY_LEASE_MINUTES: i64 = 10;

text_enum! {
    pub enum WebhookEvent {
        TicketCreated => "ticket.created",
        TicketStatusChanged => "ticket.status_changed",
        TicketAssigned => "ticket.assigned",
        LeadCreated => "lead.created",
        ArticlePublished => "knowledge.article_published",
    }
}

text_enum! {
    pub enum DeliveryStatus {
        Success => "success",
        Failed => "failed",
        Pending => "pending",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// No webhook URL configured.
    Skipped,
    Delivered { http_status: u16 },
    Failed { error: String },
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookLog {
    pub id: Uuid,
    pub event_type: String,
    pub payload: sqlx::types::Json<Value>,
    #[sqlx(try_from = "String")]
    pub status: DeliveryStatus,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Builds the envelope the automation flows expect. Envelope keys win over
/// same-named event fields.
pub fn build_payload(event: WebhookEvent, fields: Value, now: DateTime<Utc>) -> Value {
    let mut body = match fields {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".into(), other);
            map
        }
    };
    body.insert("eventType".into(), json!(event.as_str()));
    body.insert("timestamp".into(), json!(now.to_rfc3339()));
    body.insert("source".into(), json!(SOURCE));
    Value::Object(body)
}

pub fn next_retry_at(failed_at: DateTime<Utc>) -> DateTime<Utc> {
    failed_at + chrono::Duration::minutes(RETRY_DELAY_MINUTES)
}

/// When a claimed retry may be claimed again if its outcome was never recorded.
pub fn lease_until(claimed_at: DateTime<Utc>) -> DateTime<Utc> {
    claimed_at + chrono::Duration::minutes(RETRY_LEASE_MINUTES)
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_LOGGED_BODY_CHARS).collect()
}

/// Result of one HTTP attempt, before it is logged.
struct Attempt {
    http_status: Option<u16>,
    response_body: Option<String>,
    error: Option<String>,
}

impl Attempt {
    fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn outcome(&self) -> DeliveryOutcome {
        match (&self.error, self.http_status) {
            (None, Some(http_status)) => DeliveryOutcome::Delivered { http_status },
            (Some(error), _) => DeliveryOutcome::Failed {
                error: error.clone(),
            },
            (None, None) => DeliveryOutcome::Failed {
                error: "no response".into(),
            },
        }
    }
}

/// Final state written for a retried row. A failed retry is not rescheduled.
#[derive(Debug, Clone, PartialEq)]
struct RetryRecord {
    status: DeliveryStatus,
    http_status: Option<u16>,
    response_body: Option<String>,
    error: Option<String>,
}

impl RetryRecord {
    fn from_attempt(attempt: &Attempt) -> Self {
        Self {
            status: if attempt.succeeded() {
                DeliveryStatus::Success
            } else {
                DeliveryStatus::Failed
            },
            http_status: attempt.http_status,
            response_body: attempt.response_body.clone(),
            error: attempt.error.clone(),
        }
    }
}

#[derive(Clone)]
pub struct WebhookRelay {
    client: reqwest::Client,
    url: Option<String>,
    db: PgPool,
}

impl WebhookRelay {
    pub fn new(db: PgPool, url: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("solveflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build webhook HTTP client")?;
        if url.is_none() {
            info!("N8N_WEBHOOK_URL not set; webhook relay disabled");
        }
        Ok(Self { client, url, db })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Sends one event and logs the attempt.
    pub async fn deliver(
        &self,
        event: WebhookEvent,
        fields: Value,
    ) -> Result<DeliveryOutcome, AppError> {
        let Some(url) = self.url.as_deref() else {
            debug!("Webhook {event} skipped: relay disabled");
            return Ok(DeliveryOutcome::Skipped);
        };

        let payload = build_payload(event, fields, Utc::now());
        let attempt = self.send(url, &payload).await;

        let (status, retry_at) = if attempt.succeeded() {
            (DeliveryStatus::Success, None)
        } else {
            (DeliveryStatus::Failed, Some(next_retry_at(Utc::now())))
        };

        sqlx::query(
            r#"
            INSERT INTO n8n_integration_logs
                (event_type, payload, status, http_status, response_body, error_message,
                 retry_count, next_retry_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            "#,
        )
        .bind(event.as_str())
        .bind(sqlx::types::Json(&payload))
        .bind(status.as_str())
        .bind(attempt.http_status.map(i32::from))
        .bind(attempt.response_body.as_deref())
        .bind(attempt.error.as_deref())
        .bind(retry_at)
        .execute(&self.db)
        .await?;

        let outcome = attempt.outcome();
        match &outcome {
            DeliveryOutcome::Failed { error } => {
                warn!("Webhook {event} failed, retry scheduled: {error}")
            }
            _ => info!("Webhook {event} delivered"),
        }
        Ok(outcome)
    }

    /// Fire-and-forget delivery. Errors are logged, never returned to the caller.
    pub fn dispatch(&self, event: WebhookEvent, fields: Value) {
        if !self.is_enabled() {
            return;
        }
        let relay = self.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.deliver(event, fields).await {
                error!("Failed to record webhook {event}: {e}");
            }
        });
    }

    /// Retries every failed delivery whose retry time has come.
    ///
    /// Due rows are claimed in one statement that marks them `pending` under a
    /// lease, so no lock or transaction spans the HTTP calls. Each retry then
    /// records its own outcome; a row whose outcome could not be written is
    /// claimed again once its lease runs out. Each row is retried once.
    pub async fn retry_due(&self) -> Result<usize, AppError> {
        let Some(url) = self.url.as_deref() else {
            return Ok(0);
        };

        let claimed: Vec<WebhookLog> = sqlx::query_as(
            r#"
            UPDATE n8n_integration_logs
            SET status = 'pending', next_retry_at = $1
            WHERE id IN (
                SELECT id FROM n8n_integration_logs
                WHERE status IN ('failed', 'pending') AND retry_count = 0
                  AND next_retry_at <= now()
                ORDER BY next_retry_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(lease_until(Utc::now()))
        .bind(RETRY_BATCH)
        .fetch_all(&self.db)
        .await?;

        let mut recorded = 0;
        for log in &claimed {
            let attempt = self.send(url, &log.payload.0).await;
            let record = RetryRecord::from_attempt(&attempt);
            match self.record_retry(log.id, &record).await {
                Ok(()) => {
                    recorded += 1;
                    info!("Webhook retry {} ({}): {}", log.id, log.event_type, record.status);
                }
                Err(e) => error!("Failed to record webhook retry {}: {e}", log.id),
            }
        }
        Ok(recorded)
    }

    async fn record_retry(&self, id: Uuid, record: &RetryRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE n8n_integration_logs
            SET status = $2, http_status = $3, response_body = $4, error_message = $5,
                retry_count = retry_count + 1, next_retry_at = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(record.status.as_str())
        .bind(record.http_status.map(i32::from))
        .bind(record.response_body.as_deref())
        .bind(record.error.as_deref())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn send(&self, url: &str, payload: &Value) -> Attempt {
        let response = match self.client.post(url).json(payload).send().await {
            Ok(r) => r,
            Err(e) => {
                return Attempt {
                    http_status: None,
                    response_body: None,
                    error: Some(format!("Webhook request failed: {e}")),
                }
            }
        };

        let status = response.status();
        let body = truncate_body(&response.text().await.unwrap_or_default());
        Attempt {
            http_status: Some(status.as_u16()),
            error: (!status.is_success()).then(|| format!("Webhook returned {status}")),
            response_body: Some(body),
        }
    }
}

pub fn spawn_retry_worker(relay: WebhookRelay) -> Option<JoinHandle<()>> {
    if !relay.is_enabled() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETRY_TICK);
        loop {
            interval.tick().await;
            match relay.retry_due().await {
                Ok(0) => {}
                Ok(n) => info!("Retried {n} webhook deliveries"),
                Err(e) => error!("Webhook retry pass failed: {e}"),
            }
        }
    }))
}
