//! MyMemory public translation API.

use super::{ProviderError, TranslateBackend, TranslateOptions};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.mymemory.translated.net";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MyMemoryTranslator {
    client: Client,
    endpoint: String,
}

impl Default for MyMemoryTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl MyMemoryTranslator {
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyMemoryResponse {
    response_data: MyMemoryData,
    /// A number on success, sometimes a quoted number on failure.
    #[serde(default)]
    response_status: Value,
    #[serde(default)]
    response_details: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyMemoryData {
    #[serde(default)]
    translated_text: String,
}

impl TranslateBackend for MyMemoryTranslator {
    fn name(&self) -> &'static str {
        "mymemory"
    }

    async fn translate(
        &self,
        text: &str,
        options: &TranslateOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/get", self.endpoint);
        let langpair = format!("{}|{}", options.source_lang, options.target_lang);
        let response = self
            .client
            .get(&url)
            .query(&[("q", text), ("langpair", langpair.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::Quota("rate limited by endpoint".to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Network(format!("unexpected status {status}")));
        }

        let body: MyMemoryResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Unsupported(format!("unparseable response: {err}")))?;

        let api_status = body
            .response_status
            .as_i64()
            .or_else(|| {
                body.response_status
                    .as_str()
                    .and_then(|raw| raw.parse().ok())
            })
            .unwrap_or(200);
        let details = body.response_details;

        if api_status == 429 || details.to_uppercase().contains("QUOTA") {
            return Err(ProviderError::Quota(details));
        }
        if api_status == 403 {
            return Err(ProviderError::Auth(details));
        }
        if api_status != 200 {
            return Err(ProviderError::Network(format!(
                "status {api_status}: {details}"
            )));
        }

        let translated = body.response_data.translated_text;
        if translated.trim().is_empty() {
            return Err(ProviderError::Unsupported("empty translation".to_string()));
        }
        Ok(translated)
    }
}
