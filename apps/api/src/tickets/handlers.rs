use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::ticket::{
    Attachment, Ticket, TicketHistoryItem, TicketMessage, TicketPriority, TicketStatus,
};
use crate::state::AppState;
use crate::tickets::attachments::{AttachmentStore, UploadedFile};
use crate::tickets::repository::{self, NewMessage, TicketChange, TicketFilter};
use crate::tickets::workflow::{self, CreateTicketRequest, CreatedTicket};

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: TicketStatus,
}

#[derive(Debug, Deserialize)]
pub struct PriorityUpdate {
    pub priority: TicketPriority,
}

#[derive(Debug, Deserialize)]
pub struct AssigneeUpdate {
    /// `null` unassigns.
    pub agent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
    #[serde(default)]
    pub is_from_client: bool,
}

/// POST /api/v1/tickets
pub async fn handle_create_ticket(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<CreatedTicket>), AppError> {
    let created = workflow::create_ticket(&state, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/tickets
pub async fn handle_list_tickets(
    State(state): State<AppState>,
    actor: Actor,
    Query(filter): Query<TicketFilter>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(
        repository::list_tickets(&state.db, actor.company_id, &filter).await?,
    ))
}

/// GET /api/v1/tickets/:id
pub async fn handle_get_ticket(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(
        repository::get_ticket(&state.db, actor.company_id, ticket_id).await?,
    ))
}

/// PATCH /api/v1/tickets/:id/status
pub async fn handle_update_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> Result<Json<Ticket>, AppError> {
    change(&state, &actor, ticket_id, TicketChange::Status(req.status)).await
}

/// PATCH /api/v1/tickets/:id/priority
pub async fn handle_update_priority(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<PriorityUpdate>,
) -> Result<Json<Ticket>, AppError> {
    change(&state, &actor, ticket_id, TicketChange::Priority(req.priority)).await
}

/// PATCH /api/v1/tickets/:id/assignee
pub async fn handle_update_assignee(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<AssigneeUpdate>,
) -> Result<Json<Ticket>, AppError> {
    change(&state, &actor, ticket_id, TicketChange::Assignee(req.agent_id)).await
}

async fn change(
    state: &AppState,
    actor: &Actor,
    ticket_id: Uuid,
    change: TicketChange,
) -> Result<Json<Ticket>, AppError> {
    let result = workflow::change_ticket(
        state,
        actor.user_id,
        actor.company_id,
        ticket_id,
        change,
        None,
    )
    .await?;
    Ok(Json(result.ticket))
}

/// GET /api/v1/tickets/:id/messages
pub async fn handle_list_messages(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<TicketMessage>>, AppError> {
    Ok(Json(
        repository::list_messages(&state.db, actor.company_id, ticket_id).await?,
    ))
}

/// POST /api/v1/tickets/:id/messages
pub async fn handle_add_message(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<TicketMessage>), AppError> {
    let message = repository::add_message(
        &state.db,
        actor.company_id,
        ticket_id,
        &NewMessage {
            content: req.content.trim(),
            author_id: Some(actor.user_id),
            author_name: &actor.name,
            is_from_client: req.is_from_client,
            is_automatic: false,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/v1/tickets/:id/history
pub async fn handle_list_history(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<TicketHistoryItem>>, AppError> {
    Ok(Json(
        repository::list_history(&state.db, actor.company_id, ticket_id).await?,
    ))
}

/// GET /api/v1/tickets/:id/attachments
pub async fn handle_list_attachments(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<Attachment>>, AppError> {
    Ok(Json(
        repository::list_attachments(&state.db, actor.company_id, ticket_id).await?,
    ))
}

/// POST /api/v1/tickets/:id/attachments
///
/// Multipart form: `file` (required) and `message_id` (optional).
pub async fn handle_upload_attachment(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Attachment>), AppError> {
    let mut file: Option<UploadedFile> = None;
    let mut message_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;
                file = Some(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
            Some("message_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid message_id: {e}")))?;
                message_id = Some(
                    Uuid::parse_str(raw.trim())
                        .map_err(|_| AppError::Validation("message_id must be a UUID".into()))?,
                );
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("Missing 'file' field".into()))?;
    let store = AttachmentStore {
        db: &state.db,
        s3: &state.s3,
        bucket: &state.config.s3_bucket,
        endpoint: &state.config.s3_endpoint,
    };
    let attachment = store
        .upload(actor.company_id, ticket_id, message_id, file)
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}
