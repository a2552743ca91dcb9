//! Ticket synchronization: keeps one viewer's copy of a ticket consistent
//! with concurrent remote edits.
//!
//! Change events only say *that* a row changed, so ticket updates trigger a
//! re-fetch. The fetched row is compared on a small set of tracked fields and
//! only a real difference is reported, so database echoes that change nothing
//! do not cause redundant updates.
//!
//! The viewer's own writes are tagged with a `WriteTag`; the echo carrying a
//! pending tag is consumed silently instead of overwriting optimistic state.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::ticket::{Ticket, TicketCategory, TicketPriority, TicketStatus};
use crate::realtime::events::{ChangeEvent, ChangeOp, ChangeTable, WriteTag};
use crate::tickets::repository;

/// Where a `TicketSync` loads the authoritative ticket from.
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn fetch_ticket(&self, ticket_id: Uuid) -> Result<Ticket, AppError>;
}

/// Reads tickets from Postgres, scoped to one company.
pub struct PgTicketSource {
    pool: PgPool,
    company_id: Uuid,
}

impl PgTicketSource {
    pub fn new(pool: PgPool, company_id: Uuid) -> Self {
        Self { pool, company_id }
    }
}

#[async_trait]
impl TicketSource for PgTicketSource {
    async fn fetch_ticket(&self, ticket_id: Uuid) -> Result<Ticket, AppError> {
        repository::get_ticket(&self.pool, self.company_id, ticket_id).await
    }
}

/// The fields whose change is worth showing to a viewer.
#[derive(Debug, Clone, PartialEq)]
struct TicketFingerprint {
    status: TicketStatus,
    priority: TicketPriority,
    category: TicketCategory,
    assigned_agent_id: Option<Uuid>,
    ai_processed: bool,
    needs_human_review: bool,
    updated_at: DateTime<Utc>,
}

impl From<&Ticket> for TicketFingerprint {
    fn from(t: &Ticket) -> Self {
        Self {
            status: t.status,
            priority: t.priority,
            category: t.category,
            assigned_agent_id: t.assigned_agent_id,
            ai_processed: t.ai_processed,
            needs_human_review: t.needs_human_review,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    Loading,
    Ready,
    Failed(String),
}

/// What handling one change event amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Event for another ticket, or an operation that needs no action.
    Ignored,
    /// Echo of this viewer's own pending write.
    SelfEcho,
    /// Re-fetched ticket matches the local copy.
    Unchanged,
    Updated(Ticket),
    HistoryAppended,
    SuggestionsChanged,
    /// Re-fetch failed; logged, subscription keeps running.
    Failed(String),
}

pub struct TicketSync<S: TicketSource> {
    source: S,
    ticket_id: Uuid,
    client_id: Uuid,
    next_seq: u64,
    pending: HashSet<u64>,
    current: Option<Ticket>,
    fingerprint: Option<TicketFingerprint>,
    state: SyncState,
}

impl<S: TicketSource> TicketSync<S> {
    pub fn new(source: S, ticket_id: Uuid, client_id: Uuid) -> Self {
        Self {
            source,
            ticket_id,
            client_id,
            next_seq: 0,
            pending: HashSet::new(),
            current: None,
            fingerprint: None,
            state: SyncState::Loading,
        }
    }

    pub fn ticket_id(&self) -> Uuid {
        self.ticket_id
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn current(&self) -> Option<&Ticket> {
        self.current.as_ref()
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Initial fetch. A failure is kept as `SyncState::Failed` for the caller.
    pub async fn load(&mut self) -> Result<Ticket, AppError> {
        self.state = SyncState::Loading;
        match self.source.fetch_ticket(self.ticket_id).await {
            Ok(ticket) => {
                self.install(ticket.clone());
                self.state = SyncState::Ready;
                Ok(ticket)
            }
            Err(e) => {
                self.state = SyncState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Reserves a tag for a write this viewer is about to perform.
    pub fn begin_local_write(&mut self) -> WriteTag {
        self.next_seq += 1;
        self.pending.insert(self.next_seq);
        WriteTag {
            client_id: self.client_id,
            seq: self.next_seq,
        }
    }

    /// Forgets a tag whose write failed or changed nothing; no echo will come.
    pub fn abandon_local_write(&mut self, tag: WriteTag) {
        if tag.client_id == self.client_id {
            self.pending.remove(&tag.seq);
        }
    }

    /// Installs the state produced by this viewer's own write.
    /// Returns whether the tracked fields changed.
    pub fn apply_local(&mut self, ticket: Ticket) -> bool {
        let changed = self.fingerprint.as_ref() != Some(&TicketFingerprint::from(&ticket));
        self.install(ticket);
        self.state = SyncState::Ready;
        changed
    }

    pub async fn handle_event(&mut self, event: &ChangeEvent) -> SyncOutcome {
        if event.ticket_id != self.ticket_id {
            return SyncOutcome::Ignored;
        }

        match event.table {
            ChangeTable::Tickets => {
                if self.consume_own_echo(event) {
                    debug!("Suppressed echo of local write on ticket {}", self.ticket_id);
                    return SyncOutcome::SelfEcho;
                }
                match event.op {
                    ChangeOp::Insert | ChangeOp::Update => self.reconcile().await,
                    ChangeOp::Delete => SyncOutcome::Ignored,
                }
            }
            ChangeTable::TicketHistory => SyncOutcome::HistoryAppended,
            ChangeTable::SuggestedResponses => SyncOutcome::SuggestionsChanged,
        }
    }

    /// Re-fetches after missed events (e.g. a lagged receiver).
    pub async fn resync(&mut self) -> SyncOutcome {
        self.reconcile().await
    }

    fn consume_own_echo(&mut self, event: &ChangeEvent) -> bool {
        match event.origin {
            Some(tag) if tag.client_id == self.client_id => self.pending.remove(&tag.seq),
            _ => false,
        }
    }

    async fn reconcile(&mut self) -> SyncOutcome {
        match self.source.fetch_ticket(self.ticket_id).await {
            Ok(ticket) => {
                let fingerprint = TicketFingerprint::from(&ticket);
                if self.fingerprint.as_ref() == Some(&fingerprint) {
                    return SyncOutcome::Unchanged;
                }
                self.install(ticket.clone());
                self.state = SyncState::Ready;
                SyncOutcome::Updated(ticket)
            }
            Err(e) => {
                warn!("Failed to reconcile ticket {}: {e}", self.ticket_id);
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    fn install(&mut self, ticket: Ticket) {
        self.fingerprint = Some(TicketFingerprint::from(&ticket));
        self.current = Some(ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ticket::fixtures;
    use std::sync::{Arc, Mutex};

    /// In-memory source; `None` makes the next fetch fail.
    #[derive(Clone)]
    struct FakeSource {
        ticket: Arc<Mutex<Option<Ticket>>>,
        fetches: Arc<Mutex<u32>>,
    }

    impl FakeSource {
        fn new(ticket: Ticket) -> Self {
            Self {
                ticket: Arc::new(Mutex::new(Some(ticket))),
                fetches: Arc::new(Mutex::new(0)),
            }
        }

        fn set(&self, ticket: Option<Ticket>) {
            *self.ticket.lock().unwrap() = ticket;
        }

        fn fetches(&self) -> u32 {
            *self.fetches.lock().unwrap()
        }
    }

    #[async_trait]
    impl TicketSource for FakeSource {
        async fn fetch_ticket(&self, ticket_id: Uuid) -> Result<Ticket, AppError> {
            *self.fetches.lock().unwrap() += 1;
            self.ticket
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AppError::NotFound(format!("Ticket {ticket_id} not found")))
        }
    }

    fn setup() -> (FakeSource, TicketSync<FakeSource>, Ticket) {
        let ticket = fixtures::ticket("Erro no login", "não consigo entrar no sistema desde ontem");
        let source = FakeSource::new(ticket.clone());
        let sync = TicketSync::new(source.clone(), ticket.id, Uuid::new_v4());
        (source, sync, ticket)
    }

    #[tokio::test]
    async fn test_load_populates_state() {
        let (_, mut sync, ticket) = setup();
        let loaded = sync.load().await.unwrap();
        assert_eq!(loaded.id, ticket.id);
        assert_eq!(sync.state(), &SyncState::Ready);
        assert!(sync.current().is_some());
    }

    #[tokio::test]
    async fn test_load_failure_exposes_error_state() {
        let (source, mut sync, _) = setup();
        source.set(None);
        assert!(sync.load().await.is_err());
        assert!(matches!(sync.state(), SyncState::Failed(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_remote_change_is_reported_once() {
        let (source, mut sync, mut ticket) = setup();
        sync.load().await.unwrap();

        ticket.status = TicketStatus::InProgress;
        ticket.updated_at = ticket.updated_at + chrono::Duration::seconds(5);
        source.set(Some(ticket.clone()));

        let event = ChangeEvent::ticket_updated(ticket.id, None);
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Updated(ticket.clone()));
        // Same row fetched again: nothing new to show.
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Unchanged);
        assert_eq!(sync.current().unwrap().status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn test_identical_fetch_is_noop() {
        let (_, mut sync, ticket) = setup();
        sync.load().await.unwrap();
        let event = ChangeEvent::ticket_updated(ticket.id, None);
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_untracked_field_change_is_noop() {
        let (source, mut sync, mut ticket) = setup();
        sync.load().await.unwrap();
        ticket.description.push_str(" (editado)");
        source.set(Some(ticket.clone()));
        let event = ChangeEvent::ticket_updated(ticket.id, None);
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_own_echo_is_suppressed_without_fetch() {
        let (source, mut sync, mut ticket) = setup();
        sync.load().await.unwrap();
        let fetches_after_load = source.fetches();

        let tag = sync.begin_local_write();
        ticket.priority = TicketPriority::Critical;
        ticket.updated_at = ticket.updated_at + chrono::Duration::seconds(1);
        source.set(Some(ticket.clone()));
        assert!(sync.apply_local(ticket.clone()));

        let echo = ChangeEvent::ticket_updated(ticket.id, Some(tag));
        assert_eq!(sync.handle_event(&echo).await, SyncOutcome::SelfEcho);
        assert_eq!(source.fetches(), fetches_after_load);
        assert_eq!(sync.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_echo_is_consumed_only_once() {
        let (_, mut sync, ticket) = setup();
        sync.load().await.unwrap();
        let tag = sync.begin_local_write();
        let echo = ChangeEvent::ticket_updated(ticket.id, Some(tag));
        assert_eq!(sync.handle_event(&echo).await, SyncOutcome::SelfEcho);
        assert_eq!(sync.handle_event(&echo).await, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_other_clients_writes_are_reconciled() {
        let (source, mut sync, mut ticket) = setup();
        sync.load().await.unwrap();
        let _own = sync.begin_local_write();

        ticket.assigned_agent_id = Some(Uuid::new_v4());
        source.set(Some(ticket.clone()));
        let foreign = WriteTag {
            client_id: Uuid::new_v4(),
            seq: 1,
        };
        let event = ChangeEvent::ticket_updated(ticket.id, Some(foreign));
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Updated(ticket));
        assert_eq!(sync.pending_writes(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_write_does_not_suppress() {
        let (source, mut sync, mut ticket) = setup();
        sync.load().await.unwrap();
        let tag = sync.begin_local_write();
        sync.abandon_local_write(tag);

        ticket.status = TicketStatus::Resolved;
        source.set(Some(ticket.clone()));
        let event = ChangeEvent::ticket_updated(ticket.id, Some(tag));
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Updated(ticket));
    }

    #[tokio::test]
    async fn test_write_tags_are_monotonic() {
        let (_, mut sync, _) = setup();
        let a = sync.begin_local_write();
        let b = sync.begin_local_write();
        assert!(b.seq > a.seq);
        assert_eq!(a.client_id, sync.client_id());
    }

    #[tokio::test]
    async fn test_events_for_other_tickets_are_ignored() {
        let (source, mut sync, _) = setup();
        sync.load().await.unwrap();
        let before = source.fetches();
        let event = ChangeEvent::ticket_updated(Uuid::new_v4(), None);
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Ignored);
        assert_eq!(source.fetches(), before);
    }

    #[tokio::test]
    async fn test_reconcile_failure_keeps_running() {
        let (source, mut sync, mut ticket) = setup();
        sync.load().await.unwrap();

        source.set(None);
        let event = ChangeEvent::ticket_updated(ticket.id, None);
        assert!(matches!(sync.handle_event(&event).await, SyncOutcome::Failed(_)));
        assert_eq!(sync.state(), &SyncState::Ready);

        ticket.status = TicketStatus::WaitingForClient;
        source.set(Some(ticket.clone()));
        assert_eq!(sync.handle_event(&event).await, SyncOutcome::Updated(ticket));
    }

    #[tokio::test]
    async fn test_history_and_suggestion_events() {
        let (_, mut sync, ticket) = setup();
        sync.load().await.unwrap();
        assert_eq!(
            sync.handle_event(&ChangeEvent::history_inserted(ticket.id, None)).await,
            SyncOutcome::HistoryAppended
        );
        assert_eq!(
            sync.handle_event(&ChangeEvent::suggestions_changed(ticket.id, ChangeOp::Delete))
                .await,
            SyncOutcome::SuggestionsChanged
        );
    }
}
