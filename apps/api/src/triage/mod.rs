pub mod classifier;
pub mod handlers;
pub mod pipeline;
pub mod suggestions;
