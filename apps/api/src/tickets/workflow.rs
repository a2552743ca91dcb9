//! Ticket operations that fan out beyond the database: webhooks, automatic
//! classification and Helena drafting. Each side effect is best-effort; only
//! the ticket write itself can fail a request.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::AppError;
use crate::helena::drafting::draft_from_ticket;
use crate::models::ticket::{Ticket, TicketCategory, TicketPriority, TicketSource, TicketStatus};
use crate::realtime::events::WriteTag;
use crate::state::AppState;
use crate::tickets::repository::{self, ChangeResult, NewTicket, TicketChange};
use crate::triage::classifier::{Classification, TicketClassifier};
use crate::triage::pipeline::{classify_ticket, persist_classification};
use crate::webhooks::WebhookEvent;

const MIN_TITLE_CHARS: usize = 3;
const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
    #[serde(default)]
    pub category: Option<TicketCategory>,
    #[serde(default)]
    pub source: Option<TicketSource>,
    /// Agents may open tickets on a client's behalf; defaults to the caller.
    #[serde(default)]
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreatedTicket {
    pub ticket: Ticket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Set when automatic classification ran and failed. The ticket is
    /// created but left unprocessed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_error: Option<String>,
}

impl CreatedTicket {
    fn unclassified(ticket: Ticket) -> Self {
        Self {
            ticket,
            classification: None,
            classification_error: None,
        }
    }
}

pub fn validate_new_ticket(req: CreateTicketRequest, caller: Uuid) -> Result<NewTicket, AppError> {
    let title = req.title.trim().to_string();
    let description = req.description.trim().to_string();

    let title_len = title.chars().count();
    if !(MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&title_len) {
        return Err(AppError::Validation(format!(
            "Title must be between {MIN_TITLE_CHARS} and {MAX_TITLE_CHARS} characters"
        )));
    }
    if description.is_empty() {
        return Err(AppError::Validation("Description is required".into()));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(AppError::Validation(format!(
            "Description must be at most {MAX_DESCRIPTION_CHARS} characters"
        )));
    }

    Ok(NewTicket {
        title,
        description,
        priority: req.priority.unwrap_or(TicketPriority::Medium),
        category: req.category.unwrap_or(TicketCategory::Other),
        source: req.source.unwrap_or(TicketSource::Web),
        client_id: req.client_id.unwrap_or(caller),
    })
}

pub async fn create_ticket(
    state: &AppState,
    actor: &Actor,
    req: CreateTicketRequest,
) -> Result<CreatedTicket, AppError> {
    let new = validate_new_ticket(req, actor.user_id)?;
    let ticket = repository::insert_ticket(&state.db, actor.company_id, &new, actor.user_id).await?;

    state.webhooks.dispatch(
        WebhookEvent::TicketCreated,
        json!({
            "ticketId": ticket.id,
            "companyId": ticket.company_id,
            "clientId": ticket.client_id,
            "title": ticket.title,
            "priority": ticket.priority,
            "category": ticket.category,
            "source": ticket.source,
        }),
    );

    if !state.config.auto_classify {
        return Ok(CreatedTicket::unclassified(ticket));
    }
    Ok(auto_classify(&state.db, state.classifier.as_ref(), ticket).await)
}

/// Classifies a fresh ticket. A failure is reported on the result instead of
/// failing the creation, which has already committed.
pub async fn auto_classify(
    pool: &PgPool,
    classifier: &dyn TicketClassifier,
    ticket: Ticket,
) -> CreatedTicket {
    let outcome = match classify_ticket(classifier, &ticket).await {
        Ok(classification) => {
            persist_classification(pool, &ticket, classification, classifier.backend(), None).await
        }
        Err(e) => Err(e),
    };
    match outcome {
        Ok(outcome) => CreatedTicket {
            ticket: outcome.ticket,
            classification: Some(outcome.classification),
            classification_error: None,
        },
        Err(e) => {
            warn!("Automatic classification failed for ticket {}: {e}", ticket.id);
            let (_, _, message) = e.describe();
            CreatedTicket {
                ticket,
                classification: None,
                classification_error: Some(message),
            }
        }
    }
}

/// Applies a status, priority or assignee change and triggers its follow-ups.
pub async fn change_ticket(
    state: &AppState,
    actor_id: Uuid,
    company_id: Uuid,
    ticket_id: Uuid,
    change: TicketChange,
    origin: Option<WriteTag>,
) -> Result<ChangeResult, AppError> {
    let result =
        repository::apply_change(&state.db, company_id, ticket_id, change, Some(actor_id), origin)
            .await?;
    if result.changed {
        after_change(state, actor_id, &result);
    }
    Ok(result)
}

fn after_change(state: &AppState, actor_id: Uuid, result: &ChangeResult) {
    let ticket = &result.ticket;
    let previous = &result.previous;

    if ticket.status != previous.status {
        state.webhooks.dispatch(
            WebhookEvent::TicketStatusChanged,
            json!({
                "ticketId": ticket.id,
                "companyId": ticket.company_id,
                "previousStatus": previous.status,
                "newStatus": ticket.status,
                "changedBy": actor_id,
            }),
        );
        if ticket.status == TicketStatus::Resolved && state.config.helena_auto_draft {
            spawn_helena_draft(state, ticket.company_id, ticket.id);
        }
    }

    if ticket.assigned_agent_id != previous.assigned_agent_id {
        state.webhooks.dispatch(
            WebhookEvent::TicketAssigned,
            json!({
                "ticketId": ticket.id,
                "companyId": ticket.company_id,
                "previousAgentId": previous.assigned_agent_id,
                "agentId": ticket.assigned_agent_id,
                "changedBy": actor_id,
            }),
        );
    }
}

fn spawn_helena_draft(state: &AppState, company_id: Uuid, ticket_id: Uuid) {
    let db = state.db.clone();
    let knowledge = state.knowledge.clone();
    tokio::spawn(async move {
        if let Err(e) = draft_from_ticket(&db, knowledge.as_ref(), company_id, ticket_id).await {
            error!("Helena could not draft from ticket {ticket_id}: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ticket::fixtures;
    use async_trait::async_trait;

    struct FailingClassifier;

    #[async_trait]
    impl TicketClassifier for FailingClassifier {
        async fn classify(&self, _title: &str, _description: &str) -> Result<Classification, AppError> {
            Err(AppError::Upstream("model unavailable".into()))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_failed_auto_classification_is_reported() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/solveflow_test")
            .unwrap();
        let ticket = fixtures::ticket("Erro no login", "Não consigo entrar no sistema");
        let created = auto_classify(&pool, &FailingClassifier, ticket.clone()).await;

        assert_eq!(created.ticket, ticket);
        assert!(!created.ticket.ai_processed);
        assert!(created.classification.is_none());
        assert_eq!(
            created.classification_error.as_deref(),
            Some("An AI processing error occurred")
        );

        let body = serde_json::to_value(&created).unwrap();
        assert!(body["classification_error"].is_string());
        assert!(body.get("classification").is_none());
    }

    #[test]
    fn test_unclassified_ticket_has_no_error() {
        let created = CreatedTicket::unclassified(fixtures::ticket("Dúvida", "Como exporto?"));
        let body = serde_json::to_value(&created).unwrap();
        assert!(body.get("classification").is_none());
        assert!(body.get("classification_error").is_none());
    }

    fn request(title: &str, description: &str) -> CreateTicketRequest {
        CreateTicketRequest {
            title: title.into(),
            description: description.into(),
            priority: None,
            category: None,
            source: None,
            client_id: None,
        }
    }

    #[test]
    fn test_defaults_are_filled_in() {
        let caller = Uuid::new_v4();
        let new = validate_new_ticket(request("  Erro no login  ", "Não entra"), caller).unwrap();
        assert_eq!(new.title, "Erro no login");
        assert_eq!(new.priority, TicketPriority::Medium);
        assert_eq!(new.category, TicketCategory::Other);
        assert_eq!(new.source, TicketSource::Web);
        assert_eq!(new.client_id, caller);
    }

    #[test]
    fn test_explicit_fields_are_kept() {
        let client = Uuid::new_v4();
        let mut req = request("Cobrança duplicada", "Fui cobrado duas vezes");
        req.priority = Some(TicketPriority::High);
        req.category = Some(TicketCategory::Billing);
        req.source = Some(TicketSource::Whatsapp);
        req.client_id = Some(client);
        let new = validate_new_ticket(req, Uuid::new_v4()).unwrap();
        assert_eq!(new.priority, TicketPriority::High);
        assert_eq!(new.category, TicketCategory::Billing);
        assert_eq!(new.source, TicketSource::Whatsapp);
        assert_eq!(new.client_id, client);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let caller = Uuid::new_v4();
        assert!(validate_new_ticket(request("ab", "descrição"), caller).is_err());
        assert!(validate_new_ticket(request("Título ok", "   "), caller).is_err());
        assert!(validate_new_ticket(request(&"x".repeat(201), "d"), caller).is_err());
    }
}
