pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};

use crate::agents::handlers as agents;
use crate::helena::handlers as helena;
use crate::leads;
use crate::realtime::handlers as realtime;
use crate::search::handlers as search;
use crate::state::AppState;
use crate::tickets::attachments::MAX_ATTACHMENT_BYTES;
use crate::tickets::handlers as tickets;
use crate::triage::handlers as triage;

// Room for multipart framing around the largest accepted file.
const UPLOAD_BODY_LIMIT: usize = MAX_ATTACHMENT_BYTES + 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Tickets
        .route(
            "/api/v1/tickets",
            get(tickets::handle_list_tickets).post(tickets::handle_create_ticket),
        )
        .route("/api/v1/tickets/:id", get(tickets::handle_get_ticket))
        .route(
            "/api/v1/tickets/:id/status",
            patch(tickets::handle_update_status),
        )
        .route(
            "/api/v1/tickets/:id/priority",
            patch(tickets::handle_update_priority),
        )
        .route(
            "/api/v1/tickets/:id/assignee",
            patch(tickets::handle_update_assignee),
        )
        .route(
            "/api/v1/tickets/:id/messages",
            get(tickets::handle_list_messages).post(tickets::handle_add_message),
        )
        .route(
            "/api/v1/tickets/:id/history",
            get(tickets::handle_list_history),
        )
        .route(
            "/api/v1/tickets/:id/attachments",
            get(tickets::handle_list_attachments)
                .post(tickets::handle_upload_attachment)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/v1/tickets/:id/live", get(realtime::handle_live))
        // Triage
        .route("/api/v1/tickets/:id/classify", post(triage::handle_classify))
        .route(
            "/api/v1/tickets/:id/suggestions",
            get(triage::handle_list_suggestions),
        )
        .route(
            "/api/v1/tickets/:id/suggestions/regenerate",
            post(triage::handle_regenerate_suggestions),
        )
        .route(
            "/api/v1/suggestions/:id/apply",
            post(triage::handle_apply_suggestion),
        )
        .route(
            "/api/v1/suggestions/:id/reject",
            post(triage::handle_reject_suggestion),
        )
        // Helena
        .route("/api/v1/helena/drafts", get(helena::handle_list_drafts))
        .route("/api/v1/helena/stats", get(helena::handle_stats))
        .route(
            "/api/v1/helena/drafts/:id/approve",
            post(helena::handle_approve),
        )
        .route(
            "/api/v1/helena/drafts/:id/reject",
            post(helena::handle_reject),
        )
        .route(
            "/api/v1/helena/drafts/:id/edit",
            post(helena::handle_begin_edit),
        )
        .route(
            "/api/v1/helena/drafts/:id/cancel-edit",
            post(helena::handle_cancel_edit),
        )
        // Knowledge
        .route("/api/v1/knowledge/search", get(search::handle_search))
        // Agents
        .route(
            "/api/v1/agents",
            get(agents::handle_list_agents).post(agents::handle_invite_agent),
        )
        .route(
            "/api/v1/agents/:id",
            patch(agents::handle_update_agent).delete(agents::handle_remove_agent),
        )
        // Public
        .route("/api/v1/leads", post(leads::handle_create_lead))
        .with_state(state)
}
