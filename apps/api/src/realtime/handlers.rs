//! Live ticket WebSocket: `GET /api/v1/tickets/:id/live`.
//!
//! The session sends a snapshot, then forwards reconciled changes. Commands
//! sent by the client run as tagged local writes, so their own echo is not
//! reported back as a remote update.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::ticket::{Ticket, TicketPriority, TicketStatus};
use crate::realtime::sync::{PgTicketSource, SyncOutcome, TicketSync};
use crate::state::AppState;
use crate::tickets::repository::{self, TicketChange};
use crate::tickets::workflow;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SetStatus { status: TicketStatus },
    SetPriority { priority: TicketPriority },
    Assign { agent_id: Option<Uuid> },
}

impl ClientCommand {
    pub fn into_change(self) -> TicketChange {
        match self {
            ClientCommand::SetStatus { status } => TicketChange::Status(status),
            ClientCommand::SetPriority { priority } => TicketChange::Priority(priority),
            ClientCommand::Assign { agent_id } => TicketChange::Assignee(agent_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot { ticket: Ticket },
    TicketUpdated { ticket: Ticket },
    HistoryAppended,
    SuggestionsChanged,
    Ack { seq: u64, changed: bool, ticket: Ticket },
    Error { code: String, message: String },
}

impl ServerMessage {
    fn error(e: &AppError) -> Self {
        let (_, code, message) = e.describe();
        ServerMessage::Error {
            code: code.to_string(),
            message,
        }
    }
}

/// Maps a reconciliation outcome to what the client needs to hear, if anything.
pub fn outcome_message(outcome: SyncOutcome) -> Option<ServerMessage> {
    match outcome {
        SyncOutcome::Updated(ticket) => Some(ServerMessage::TicketUpdated { ticket }),
        SyncOutcome::HistoryAppended => Some(ServerMessage::HistoryAppended),
        SyncOutcome::SuggestionsChanged => Some(ServerMessage::SuggestionsChanged),
        SyncOutcome::Ignored
        | SyncOutcome::SelfEcho
        | SyncOutcome::Unchanged
        | SyncOutcome::Failed(_) => None,
    }
}

/// GET /api/v1/tickets/:id/live
pub async fn handle_live(
    State(state): State<AppState>,
    actor: Actor,
    Path(ticket_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    // Reject unknown tickets before upgrading.
    repository::get_ticket(&state.db, actor.company_id, ticket_id).await?;
    Ok(ws.on_upgrade(move |socket| run_session(socket, state, actor, ticket_id)))
}

type Sink = SplitSink<WebSocket, Message>;

async fn send(sink: &mut Sink, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => sink.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode live message: {e}");
            true
        }
    }
}

async fn run_session(socket: WebSocket, state: AppState, actor: Actor, ticket_id: Uuid) {
    let client_id = Uuid::new_v4();
    // Subscribe before the initial load so nothing committed in between is missed.
    let mut subscription = state.realtime.subscribe(ticket_id);
    let mut sync = TicketSync::new(
        PgTicketSource::new(state.db.clone(), actor.company_id),
        ticket_id,
        client_id,
    );
    let (mut sink, mut stream) = socket.split();

    match sync.load().await {
        Ok(ticket) => {
            if !send(&mut sink, &ServerMessage::Snapshot { ticket }).await {
                return;
            }
        }
        Err(e) => {
            send(&mut sink, &ServerMessage::error(&e)).await;
            return;
        }
    }
    info!("Live session {client_id} opened on ticket {ticket_id} by {}", actor.user_id);

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Live session {client_id} socket error: {e}");
                        break;
                    }
                };
                let reply = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => execute(&state, &actor, &mut sync, command).await,
                    Err(e) => ServerMessage::error(&AppError::Validation(format!(
                        "Unrecognized command: {e}"
                    ))),
                };
                if !send(&mut sink, &reply).await {
                    break;
                }
            }
            event = subscription.recv() => {
                let outcome = match event {
                    Ok(event) => sync.handle_event(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Live session {client_id} lagged by {skipped} event(s); resyncing");
                        sync.resync().await
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(message) = outcome_message(outcome) {
                    if !send(&mut sink, &message).await {
                        break;
                    }
                }
            }
        }
    }

    info!("Live session {client_id} closed on ticket {ticket_id}");
}

async fn execute(
    state: &AppState,
    actor: &Actor,
    sync: &mut TicketSync<PgTicketSource>,
    command: ClientCommand,
) -> ServerMessage {
    let tag = sync.begin_local_write();
    let result = workflow::change_ticket(
        state,
        actor.user_id,
        actor.company_id,
        sync.ticket_id(),
        command.into_change(),
        Some(tag),
    )
    .await;

    match result {
        Ok(result) => {
            if !result.changed {
                sync.abandon_local_write(tag);
            }
            sync.apply_local(result.ticket.clone());
            ServerMessage::Ack {
                seq: tag.seq,
                changed: result.changed,
                ticket: result.ticket,
            }
        }
        Err(e) => {
            sync.abandon_local_write(tag);
            ServerMessage::error(&e)
        }
    }
}
