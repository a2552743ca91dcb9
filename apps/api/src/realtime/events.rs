use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::text_enum;

/// Postgres notification channel carrying `ChangeEvent` JSON payloads.
pub const CHANGES_CHANNEL: &str = "solveflow_changes";

text_enum! {
    pub enum ChangeTable {
        Tickets => "tickets",
        TicketHistory => "historico_tickets",
        SuggestedResponses => "suggested_responses",
    }
}

text_enum! {
    pub enum ChangeOp {
        Insert => "insert",
        Update => "update",
        Delete => "delete",
    }
}

/// Identifies one locally issued write so its echo can be recognised.
/// `seq` grows monotonically per `client_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteTag {
    pub client_id: Uuid,
    pub seq: u64,
}

/// Row-level change notification for one ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub op: ChangeOp,
    pub ticket_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<WriteTag>,
}

impl ChangeEvent {
    pub fn new(table: ChangeTable, op: ChangeOp, ticket_id: Uuid) -> Self {
        Self {
            table,
            op,
            ticket_id,
            origin: None,
        }
    }

    pub fn ticket_updated(ticket_id: Uuid, origin: Option<WriteTag>) -> Self {
        Self {
            origin,
            ..Self::new(ChangeTable::Tickets, ChangeOp::Update, ticket_id)
        }
    }

    pub fn history_inserted(ticket_id: Uuid, origin: Option<WriteTag>) -> Self {
        Self {
            origin,
            ..Self::new(ChangeTable::TicketHistory, ChangeOp::Insert, ticket_id)
        }
    }

    pub fn suggestions_changed(ticket_id: Uuid, op: ChangeOp) -> Self {
        Self::new(ChangeTable::SuggestedResponses, op, ticket_id)
    }
}

/// Queues a change notification on `conn`.
/// Inside a transaction Postgres delivers it only on commit.
pub async fn notify_change(conn: &mut PgConnection, event: &ChangeEvent) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_notify($1, $2::text)")
        .bind(CHANGES_CHANNEL)
        .bind(Json(event))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_shape() {
        let id = Uuid::new_v4();
        let event = ChangeEvent::history_inserted(id, None);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["table"], "historico_tickets");
        assert_eq!(value["op"], "insert");
        assert!(value.get("origin").is_none());
    }

    #[test]
    fn test_event_without_origin_parses() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"table":"tickets","op":"update","ticket_id":"{id}"}}"#);
        let event: ChangeEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(event, ChangeEvent::ticket_updated(id, None));
    }

    #[test]
    fn test_tagged_event_round_trips() {
        let tag = WriteTag {
            client_id: Uuid::new_v4(),
            seq: 7,
        };
        let event = ChangeEvent::ticket_updated(Uuid::new_v4(), Some(tag));
        let raw = serde_json::to_string(&event).unwrap();
        let parsed: ChangeEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.origin, Some(tag));
    }
}
