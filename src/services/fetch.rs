use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;

/// JSON GET with a hard per-request timeout.
pub trait Fetcher: Send + Sync {
    fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, EngineError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, EngineError> {
        let client = Client::builder()
            .user_agent(concat!("overlaylex-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Network(e.to_string()))?;
        Ok(HttpFetcher { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, EngineError> {
        debug!(url, timeout_ms = timeout.as_millis() as u64, "GET");

        let resp = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .timeout(timeout)
            .send()
            .map_err(|e| map_send_error(url, e))?;

        let status = resp.status();
        let bytes = resp.bytes().map_err(|e| map_send_error(url, e))?;
        let (text, _) = encoding_rs::UTF_8.decode_with_bom_removal(&bytes);

        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                status: status.as_u16(),
                message: extract_error_message(status, &text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

fn map_send_error(url: &str, e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout {
            url: url.to_string(),
        }
    } else {
        EngineError::Network(e.to_string())
    }
}

fn extract_error_message(status: StatusCode, body_text: &str) -> String {
    // API errors look like { "error": "...", "message": "..." }
    if let Ok(v) = serde_json::from_str::<Value>(body_text) {
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = v.get("error").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    let trimmed = body_text.trim();
    if trimmed.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    if trimmed.chars().count() > 400 {
        let snippet: String = trimmed.chars().take(400).collect();
        format!("{snippet}...")
    } else {
        trimmed.to_string()
    }
}
