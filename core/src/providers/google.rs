//! Free Google web-translate endpoint.
//!
//! Same unauthenticated `translate_a/single` call the translate widget
//! makes. The response is a loosely-typed JSON array; only the first
//! element (the translated sentence list) is read.

use super::{ProviderError, TranslateBackend, TranslateOptions};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://translate.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GoogleFreeTranslator {
    client: Client,
    endpoint: String,
}

impl Default for GoogleFreeTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl GoogleFreeTranslator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl TranslateBackend for GoogleFreeTranslator {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn translate(
        &self,
        text: &str,
        options: &TranslateOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/translate_a/single", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("client", "gtx"),
                ("sl", options.source_lang.as_str()),
                ("tl", options.target_lang.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::Quota("rate limited by endpoint".to_string()));
        }
        if status.is_client_error() {
            return Err(ProviderError::Auth(format!("request rejected: {status}")));
        }
        if !status.is_success() {
            return Err(ProviderError::Network(format!("unexpected status {status}")));
        }

        let body: Value = response.json().await?;
        parse_response(&body)
            .ok_or_else(|| ProviderError::Unsupported("unrecognized response shape".to_string()))
    }
}

/// The endpoint answers `[[["<out>", "<in>", ...], ...], ...]`; translated
/// sentence fragments concatenate in order.
fn parse_response(body: &Value) -> Option<String> {
    let sentences = body.get(0)?.as_array()?;
    let mut out = String::new();
    for sentence in sentences {
        if let Some(fragment) = sentence.get(0).and_then(Value::as_str) {
            out.push_str(fragment);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
