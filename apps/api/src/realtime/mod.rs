//! Realtime ticket updates.
//!
//! Writers queue a `pg_notify` in the same transaction as their write; the
//! change listener forwards committed notifications into the `RealtimeHub`,
//! and each live WebSocket session reconciles them through its own
//! `TicketSync`.

pub mod events;
pub mod handlers;
pub mod hub;
pub mod sync;
