use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Base URL of the serverless functions (`generate-embeddings`, `search-knowledge`).
    pub functions_url: String,
    pub functions_api_key: String,
    /// Outbound automation webhook. Relay is disabled when unset.
    pub n8n_webhook_url: Option<String>,
    /// Run the classification pipeline right after ticket creation.
    pub auto_classify: bool,
    /// Let Helena draft an article when a ticket is resolved.
    pub helena_auto_draft: bool,
    /// Artificial delay for the keyword classifier, in milliseconds.
    pub classifier_latency_ms: u64,
    /// Reverse proxies in front of the API that append to `X-Forwarded-For`.
    /// Zero means the socket peer is the client.
    pub trusted_proxy_hops: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            functions_url: require_env("FUNCTIONS_URL")?,
            functions_api_key: require_env("FUNCTIONS_API_KEY")?,
            n8n_webhook_url: std::env::var("N8N_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            auto_classify: parse_flag("AUTO_CLASSIFY", true)?,
            helena_auto_draft: parse_flag("HELENA_AUTO_DRAFT", true)?,
            classifier_latency_ms: std::env::var("CLASSIFIER_LATENCY_MS")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u64>()
                .context("CLASSIFIER_LATENCY_MS must be a number of milliseconds")?,
            trusted_proxy_hops: std::env::var("TRUSTED_PROXY_HOPS")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<usize>()
                .context("TRUSTED_PROXY_HOPS must be a non-negative integer")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_flag(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => parse_bool(&raw).with_context(|| format!("{key} must be true or false")),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" on "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
