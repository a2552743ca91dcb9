use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::ticket::TicketPriority;

/// Service-level targets for one priority, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlaTargets {
    pub first_response_hours: i64,
    pub resolution_hours: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlaDeadlines {
    pub first_response_at: DateTime<Utc>,
    pub resolution_at: DateTime<Utc>,
}

pub fn targets_for(priority: TicketPriority) -> SlaTargets {
    let (first_response_hours, resolution_hours) = match priority {
        TicketPriority::Critical => (1, 4),
        TicketPriority::High => (4, 24),
        TicketPriority::Medium => (8, 48),
        TicketPriority::Low => (24, 72),
    };
    SlaTargets {
        first_response_hours,
        resolution_hours,
    }
}

/// Deadlines are always measured from ticket creation, so a priority change
/// moves them relative to the original start rather than to "now".
pub fn compute_deadlines(priority: TicketPriority, opened_at: DateTime<Utc>) -> SlaDeadlines {
    let targets = targets_for(priority);
    SlaDeadlines {
        first_response_at: opened_at + Duration::hours(targets.first_response_hours),
        resolution_at: opened_at + Duration::hours(targets.resolution_hours),
    }
}
