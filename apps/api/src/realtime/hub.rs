use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::realtime::events::{ChangeEvent, CHANGES_CHANNEL};

const CHANNEL_CAPACITY: usize = 64;
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(5);

type Channels = Arc<Mutex<HashMap<Uuid, broadcast::Sender<ChangeEvent>>>>;

/// Fans ticket change events out to per-ticket broadcast channels.
///
/// A channel exists only while at least one `TicketSubscription` for the
/// ticket is alive.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Channels,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, ticket_id: Uuid) -> TicketSubscription {
        let receiver = self
            .lock()
            .entry(ticket_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        debug!("Subscribed to ticket {ticket_id}");
        TicketSubscription {
            ticket_id,
            receiver: Some(receiver),
            hub: self.clone(),
        }
    }

    /// Delivers `event` to the ticket's subscribers. Returns how many received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let channels = self.lock();
        match channels.get(&event.ticket_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    pub fn subscriber_count(&self, ticket_id: Uuid) -> usize {
        self.lock()
            .get(&ticket_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    fn release(&self, ticket_id: Uuid) {
        let mut channels = self.lock();
        if channels
            .get(&ticket_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&ticket_id);
            debug!("Closed realtime channel for ticket {ticket_id}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, broadcast::Sender<ChangeEvent>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One viewer's subscription to a ticket. Dropping it unsubscribes.
pub struct TicketSubscription {
    ticket_id: Uuid,
    receiver: Option<broadcast::Receiver<ChangeEvent>>,
    hub: RealtimeHub,
}

impl TicketSubscription {
    pub fn ticket_id(&self) -> Uuid {
        self.ticket_id
    }

    pub async fn recv(&mut self) -> Result<ChangeEvent, broadcast::error::RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for TicketSubscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.hub.release(self.ticket_id);
    }
}

/// Forwards Postgres change notifications into the hub for the life of the process.
pub fn spawn_change_listener(pool: PgPool, hub: RealtimeHub) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = run_listener(&pool, &hub).await {
                error!("Change listener failed: {e}; reconnecting in {LISTENER_RETRY_DELAY:?}");
            }
            tokio::time::sleep(LISTENER_RETRY_DELAY).await;
        }
    })
}

async fn run_listener(pool: &PgPool, hub: &RealtimeHub) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGES_CHANNEL).await?;
    info!("Listening for change notifications on '{CHANGES_CHANNEL}'");

    loop {
        let notification = listener.recv().await?;
        match serde_json::from_str::<ChangeEvent>(notification.payload()) {
            Ok(event) => {
                hub.publish(event);
            }
            Err(e) => warn!("Ignoring malformed change notification: {e}"),
        }
    }
}
