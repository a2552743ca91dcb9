pub mod attachments;
pub mod handlers;
pub mod repository;
pub mod sla;
pub mod workflow;
