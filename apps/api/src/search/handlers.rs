use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::auth::Actor;
use crate::errors::AppError;
use crate::search::semantic::{semantic_search, SearchOptions, SearchResult};
use crate::state::AppState;

const MAX_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
    pub threshold: Option<f64>,
}

impl SearchQuery {
    fn options(&self) -> Result<SearchOptions, AppError> {
        let mut options = SearchOptions::default();
        if let Some(limit) = self.limit {
            options.limit = limit.min(MAX_LIMIT);
        }
        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AppError::Validation(
                    "threshold must be between 0 and 1".into(),
                ));
            }
            options.similarity_threshold = threshold;
        }
        Ok(options)
    }
}

/// GET /api/v1/knowledge/search?q=...
pub async fn handle_search(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    let options = query.options()?;
    let results = semantic_search(
        state.knowledge.as_ref(),
        &state.db,
        actor.company_id,
        &query.q,
        &options,
    )
    .await?;
    Ok(Json(results))
}
