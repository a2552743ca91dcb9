use serde::Deserialize;
use sqlx::{PgConnection, PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::ticket::{
    Attachment, HistoryAction, Ticket, TicketCategory, TicketHistoryItem, TicketMessage,
    TicketPriority, TicketSource, TicketStatus,
};
use crate::realtime::events::{notify_change, ChangeEvent, WriteTag};
use crate::tickets::sla::{compute_deadlines, SlaDeadlines};

/// Validated input for a new ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub category: TicketCategory,
    pub source: TicketSource,
    pub client_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_agent_id: Option<Uuid>,
}

/// A single-field mutation of a ticket. Each one is recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum TicketChange {
    Status(TicketStatus),
    Priority(TicketPriority),
    Assignee(Option<Uuid>),
}

/// What a change will write, derived from the current row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePlan {
    pub action: HistoryAction,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub sla: Option<SlaDeadlines>,
}

#[derive(Debug, Clone)]
pub struct ChangeResult {
    pub ticket: Ticket,
    pub previous: Ticket,
    pub changed: bool,
}

pub struct NewMessage<'a> {
    pub content: &'a str,
    pub author_id: Option<Uuid>,
    pub author_name: &'a str,
    pub is_from_client: bool,
    pub is_automatic: bool,
}

pub struct HistoryEntry<'a> {
    pub ticket_id: Uuid,
    pub action: HistoryAction,
    pub previous_value: Option<&'a str>,
    pub new_value: Option<&'a str>,
    pub user_id: Option<Uuid>,
}

/// Decides whether `change` does anything to `ticket` and what it records.
///
/// Returns `Ok(None)` for a change that leaves the ticket as it is.
/// A closed ticket only accepts being reopened to `in_progress`.
pub fn plan_change(ticket: &Ticket, change: TicketChange) -> Result<Option<ChangePlan>, AppError> {
    let plan = match change {
        TicketChange::Status(status) => {
            if status == ticket.status {
                return Ok(None);
            }
            ChangePlan {
                action: HistoryAction::StatusChanged,
                previous_value: Some(ticket.status.to_string()),
                new_value: Some(status.to_string()),
                sla: None,
            }
        }
        TicketChange::Priority(priority) => {
            if priority == ticket.priority {
                return Ok(None);
            }
            ChangePlan {
                action: HistoryAction::PriorityChanged,
                previous_value: Some(ticket.priority.to_string()),
                new_value: Some(priority.to_string()),
                sla: Some(compute_deadlines(priority, ticket.created_at)),
            }
        }
        TicketChange::Assignee(agent) => {
            if agent == ticket.assigned_agent_id {
                return Ok(None);
            }
            ChangePlan {
                action: HistoryAction::AgentChanged,
                previous_value: ticket.assigned_agent_id.map(|id| id.to_string()),
                new_value: agent.map(|id| id.to_string()),
                sla: None,
            }
        }
    };

    if ticket.status == TicketStatus::Closed
        && change != TicketChange::Status(TicketStatus::InProgress)
    {
        return Err(AppError::Conflict(format!(
            "Ticket {} is closed; reopen it before making changes",
            ticket.id
        )));
    }

    Ok(Some(plan))
}

pub async fn insert_ticket(
    pool: &PgPool,
    company_id: Uuid,
    new: &NewTicket,
    actor_id: Uuid,
) -> Result<Ticket, AppError> {
    let mut tx = pool.begin().await?;

    let ticket: Ticket = sqlx::query_as(
        r#"
        INSERT INTO tickets
            (title, description, status, priority, category, company_id, client_id, source)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(&new.title)
    .bind(&new.description)
    .bind(TicketStatus::New.as_str())
    .bind(new.priority.as_str())
    .bind(new.category.as_str())
    .bind(company_id)
    .bind(new.client_id)
    .bind(new.source.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let sla = compute_deadlines(ticket.priority, ticket.created_at);
    let ticket: Ticket = sqlx::query_as(
        "UPDATE tickets SET sla_first_response_at = $2, sla_resolution_at = $3 WHERE id = $1 RETURNING *",
    )
    .bind(ticket.id)
    .bind(sla.first_response_at)
    .bind(sla.resolution_at)
    .fetch_one(&mut *tx)
    .await?;

    record_history(
        &mut tx,
        HistoryEntry {
            ticket_id: ticket.id,
            action: HistoryAction::Created,
            previous_value: None,
            new_value: Some(ticket.status.as_str()),
            user_id: Some(actor_id),
        },
    )
    .await?;

    tx.commit().await?;
    info!("Created ticket {} for company {company_id}", ticket.id);
    Ok(ticket)
}

pub async fn get_ticket<'e, E: PgExecutor<'e>>(
    executor: E,
    company_id: Uuid,
    ticket_id: Uuid,
) -> Result<Ticket, AppError> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1 AND company_id = $2")
        .bind(ticket_id)
        .bind(company_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {ticket_id} not found")))
}

pub async fn list_tickets(
    pool: &PgPool,
    company_id: Uuid,
    filter: &TicketFilter,
) -> Result<Vec<Ticket>, AppError> {
    Ok(sqlx::query_as::<_, Ticket>(
        r#"
        SELECT * FROM tickets
        WHERE company_id = $1
          AND ($2::text IS NULL OR status = $2)
          AND ($3::text IS NULL OR priority = $3)
          AND ($4::uuid IS NULL OR assigned_agent_id = $4)
        ORDER BY created_at DESC
        "#,
    )
    .bind(company_id)
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.priority.map(|p| p.as_str()))
    .bind(filter.assigned_agent_id)
    .fetch_all(pool)
    .await?)
}

/// Applies one field change inside a transaction: row update, history entry
/// and change notifications commit together.
pub async fn apply_change(
    pool: &PgPool,
    company_id: Uuid,
    ticket_id: Uuid,
    change: TicketChange,
    actor_id: Option<Uuid>,
    origin: Option<WriteTag>,
) -> Result<ChangeResult, AppError> {
    let mut tx = pool.begin().await?;

    let current: Ticket = sqlx::query_as(
        "SELECT * FROM tickets WHERE id = $1 AND company_id = $2 FOR UPDATE",
    )
    .bind(ticket_id)
    .bind(company_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Ticket {ticket_id} not found")))?;

    let Some(plan) = plan_change(&current, change)? else {
        return Ok(ChangeResult {
            ticket: current.clone(),
            previous: current,
            changed: false,
        });
    };

    let updated: Ticket = match change {
        TicketChange::Status(status) => {
            sqlx::query_as(
                "UPDATE tickets SET status = $3, updated_at = now() WHERE id = $1 AND company_id = $2 RETURNING *",
            )
            .bind(ticket_id)
            .bind(company_id)
            .bind(status.as_str())
            .fetch_one(&mut *tx)
            .await?
        }
        TicketChange::Priority(priority) => {
            let sla = plan
                .sla
                .unwrap_or_else(|| compute_deadlines(priority, current.created_at));
            sqlx::query_as(
                r#"
                UPDATE tickets
                SET priority = $3, sla_first_response_at = $4, sla_resolution_at = $5, updated_at = now()
                WHERE id = $1 AND company_id = $2
                RETURNING *
                "#,
            )
            .bind(ticket_id)
            .bind(company_id)
            .bind(priority.as_str())
            .bind(sla.first_response_at)
            .bind(sla.resolution_at)
            .fetch_one(&mut *tx)
            .await?
        }
        TicketChange::Assignee(agent) => {
            if let Some(agent_id) = agent {
                ensure_active_agent(&mut tx, company_id, agent_id).await?;
            }
            sqlx::query_as(
                "UPDATE tickets SET assigned_agent_id = $3, updated_at = now() WHERE id = $1 AND company_id = $2 RETURNING *",
            )
            .bind(ticket_id)
            .bind(company_id)
            .bind(agent)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    record_history(
        &mut tx,
        HistoryEntry {
            ticket_id,
            action: plan.action,
            previous_value: plan.previous_value.as_deref(),
            new_value: plan.new_value.as_deref(),
            user_id: actor_id,
        },
    )
    .await?;
    notify_change(&mut tx, &ChangeEvent::ticket_updated(ticket_id, origin)).await?;
    notify_change(&mut tx, &ChangeEvent::history_inserted(ticket_id, origin)).await?;

    tx.commit().await?;
    info!(
        "Ticket {ticket_id}: {} {:?} -> {:?}",
        plan.action, plan.previous_value, plan.new_value
    );

    Ok(ChangeResult {
        ticket: updated,
        previous: current,
        changed: true,
    })
}

async fn ensure_active_agent(
    conn: &mut PgConnection,
    company_id: Uuid,
    agent_id: Uuid,
) -> Result<(), AppError> {
    let active: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM agents_view WHERE id = $1 AND company_id = $2 AND status = 'active')",
    )
    .bind(agent_id)
    .bind(company_id)
    .fetch_one(conn)
    .await?;
    if active {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Agent {agent_id} is not an active member of this company"
        )))
    }
}

/// Appends a write-once history entry.
pub async fn record_history(conn: &mut PgConnection, entry: HistoryEntry<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO historico_tickets (ticket_id, action, previous_value, new_value, user_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.ticket_id)
    .bind(entry.action.as_str())
    .bind(entry.previous_value)
    .bind(entry.new_value)
    .bind(entry.user_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_message(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    message: &NewMessage<'_>,
) -> Result<TicketMessage, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO messages (ticket_id, content, author_id, author_name, is_from_client, is_automatic)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(ticket_id)
    .bind(message.content)
    .bind(message.author_id)
    .bind(message.author_name)
    .bind(message.is_from_client)
    .bind(message.is_automatic)
    .fetch_one(conn)
    .await
}

pub async fn add_message(
    pool: &PgPool,
    company_id: Uuid,
    ticket_id: Uuid,
    message: &NewMessage<'_>,
) -> Result<TicketMessage, AppError> {
    if message.content.trim().is_empty() {
        return Err(AppError::Validation("Message content cannot be empty".into()));
    }
    let mut tx = pool.begin().await?;
    get_ticket(&mut *tx, company_id, ticket_id).await?;
    let created = insert_message(&mut tx, ticket_id, message).await?;
    sqlx::query("UPDATE tickets SET updated_at = now() WHERE id = $1")
        .bind(ticket_id)
        .execute(&mut *tx)
        .await?;
    notify_change(&mut tx, &ChangeEvent::ticket_updated(ticket_id, None)).await?;
    tx.commit().await?;
    Ok(created)
}

pub async fn list_messages(
    pool: &PgPool,
    company_id: Uuid,
    ticket_id: Uuid,
) -> Result<Vec<TicketMessage>, AppError> {
    get_ticket(pool, company_id, ticket_id).await?;
    Ok(sqlx::query_as::<_, TicketMessage>(
        "SELECT * FROM messages WHERE ticket_id = $1 ORDER BY created_at ASC",
    )
    .bind(ticket_id)
    .fetch_all(pool)
    .await?)
}

pub async fn list_history(
    pool: &PgPool,
    company_id: Uuid,
    ticket_id: Uuid,
) -> Result<Vec<TicketHistoryItem>, AppError> {
    get_ticket(pool, company_id, ticket_id).await?;
    Ok(sqlx::query_as::<_, TicketHistoryItem>(
        "SELECT * FROM historico_tickets WHERE ticket_id = $1 ORDER BY created_at ASC",
    )
    .bind(ticket_id)
    .fetch_all(pool)
    .await?)
}

pub async fn list_attachments(
    pool: &PgPool,
    company_id: Uuid,
    ticket_id: Uuid,
) -> Result<Vec<Attachment>, AppError> {
    get_ticket(pool, company_id, ticket_id).await?;
    Ok(sqlx::query_as::<_, Attachment>(
        "SELECT * FROM attachments WHERE ticket_id = $1 ORDER BY created_at ASC",
    )
    .bind(ticket_id)
    .fetch_all(pool)
    .await?)
}
