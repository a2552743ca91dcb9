//! Helena, the knowledge-curation assistant: drafts articles from resolved
//! tickets and holds them until an agent approves or rejects them.

pub mod curation;
pub mod drafting;
pub mod handlers;
