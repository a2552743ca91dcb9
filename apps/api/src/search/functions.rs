//! HTTP client for the `generate-embeddings` and `search-knowledge` functions.
//! Retries on 429 and 5xx with exponential backoff.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Deserialize, Serialize,
};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::search::{DocumentMatch, IndexedDocument, KnowledgeIndex, MatchRequest};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FunctionsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Function {function} returned {status}: {message}")]
    Api {
        function: &'static str,
        status: u16,
        message: String,
    },

    #[error("Function {0} returned an empty embedding")]
    EmptyEmbedding(&'static str),

    #[error("Gave up after {retries} retries")]
    Exhausted { retries: u32 },
}

impl From<FunctionsError> for AppError {
    fn from(e: FunctionsError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// With a document reference, `generate-embeddings` also stores the vector.
#[derive(Serialize)]
struct StoreEmbeddingRequest<'a> {
    text: &'a str,
    document_id: Uuid,
    document_type: &'a str,
    company_id: Uuid,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    embedding: &'a [f32],
    company_id: Uuid,
    document_type: &'a str,
    match_threshold: f64,
    match_count: usize,
}

impl<'a> From<&MatchRequest<'a>> for SearchRequest<'a> {
    fn from(request: &MatchRequest<'a>) -> Self {
        Self {
            embedding: request.embedding,
            company_id: request.company_id,
            document_type: request.document_type,
            match_threshold: request.similarity_threshold,
            match_count: request.match_count,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<DocumentMatch>,
}

#[derive(Clone)]
pub struct FunctionsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FunctionsClient {
    pub fn new(base_url: &str, api_key: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build functions HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn function_url(&self, function: &str) -> String {
        format!("{}/{function}", self.base_url)
    }

    async fn invoke<B, T>(&self, function: &'static str, body: &B) -> Result<T, FunctionsError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.function_url(function);
        let mut last_error: Option<FunctionsError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 500ms, 1s
                let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "{function} attempt {attempt} failed, retrying after {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(FunctionsError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                last_error = Some(FunctionsError::Api {
                    function,
                    status: status.as_u16(),
                    message,
                });
                continue;
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(FunctionsError::Api {
                    function,
                    status: status.as_u16(),
                    message,
                });
            }

            debug!("{function} succeeded");
            return Ok(response.json().await?);
        }

        Err(last_error.unwrap_or(FunctionsError::Exhausted {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl KnowledgeIndex for FunctionsClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let response: EmbeddingResponse = self
            .invoke("generate-embeddings", &EmbeddingRequest { text })
            .await?;
        if response.embedding.is_empty() {
            return Err(FunctionsError::EmptyEmbedding("generate-embeddings").into());
        }
        Ok(response.embedding)
    }

    async fn match_documents(
        &self,
        request: &MatchRequest<'_>,
    ) -> Result<Vec<DocumentMatch>, AppError> {
        let response: SearchResponse = self
            .invoke("search-knowledge", &SearchRequest::from(request))
            .await?;
        Ok(response.matches)
    }

    async fn index_document(&self, document: &IndexedDocument) -> Result<(), AppError> {
        let _: IgnoredAny = self
            .invoke(
                "generate-embeddings",
                &StoreEmbeddingRequest {
                    text: &document.content,
                    document_id: document.id,
                    document_type: &document.document_type,
                    company_id: document.company_id,
                },
            )
            .await?;
        debug!("Indexed {} {}", document.document_type, document.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_url_ignores_trailing_slash() {
        let client = FunctionsClient::new("https://fn.example.com/v1/", "key".into()).unwrap();
        assert_eq!(
            client.function_url("search-knowledge"),
            "https://fn.example.com/v1/search-knowledge"
        );
    }

    #[test]
    fn test_search_response_tolerates_missing_matches() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.matches.is_empty());
    }

    #[test]
    fn test_search_request_carries_filters() {
        let embedding = [0.1_f32, 0.2];
        let company_id = Uuid::new_v4();
        let request = MatchRequest {
            company_id,
            embedding: &embedding,
            document_type: "knowledge_article",
            similarity_threshold: 0.7,
            match_count: 10,
        };
        let body = serde_json::to_value(SearchRequest::from(&request)).unwrap();
        assert_eq!(body["document_type"], "knowledge_article");
        assert_eq!(body["match_threshold"], 0.7);
        assert_eq!(body["match_count"], 10);
        assert_eq!(body["company_id"], company_id.to_string());
    }

    #[test]
    fn test_errors_surface_as_upstream() {
        let err: AppError = FunctionsError::EmptyEmbedding("generate-embeddings").into();
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
