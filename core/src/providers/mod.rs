//! Translation providers.
//!
//! Every backend takes one already-masked segment and returns its
//! translation. Failures are classified so callers can tell a retryable
//! hiccup from a dead credential, and the dispatch enum keeps call sites
//! free of generics.

pub mod google;
pub mod mymemory;
pub mod retry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected the request: {0}")]
    Auth(String),
    #[error("provider quota exhausted: {0}")]
    Quota(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("provider cannot handle this input: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Quota and network problems are worth another attempt; auth and
    /// unsupported-input failures never fix themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Network(_) | ProviderError::Quota(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// Grammatical-gender hint some target languages need for the persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Neutral,
    Female,
    Male,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateOptions {
    pub source_lang: String,
    pub target_lang: String,
    pub gender: Gender,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            source_lang: "en".to_string(),
            target_lang: "pt".to_string(),
            gender: Gender::default(),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait TranslateBackend {
    fn name(&self) -> &'static str;

    async fn translate(
        &self,
        text: &str,
        options: &TranslateOptions,
    ) -> Result<String, ProviderError>;
}

/// Configured provider choice, as it appears in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Google,
    #[serde(rename = "mymemory")]
    MyMemory,
    Fixed,
}

impl ProviderKind {
    pub fn build(self) -> Provider {
        match self {
            ProviderKind::Google => Provider::Google(google::GoogleFreeTranslator::default()),
            ProviderKind::MyMemory => Provider::MyMemory(mymemory::MyMemoryTranslator::default()),
            ProviderKind::Fixed => Provider::Fixed(FixedTranslator::default()),
        }
    }
}

/// Concrete backend dispatch.
#[derive(Debug, Clone)]
pub enum Provider {
    Google(google::GoogleFreeTranslator),
    MyMemory(mymemory::MyMemoryTranslator),
    Fixed(FixedTranslator),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Google(inner) => inner.name(),
            Provider::MyMemory(inner) => inner.name(),
            Provider::Fixed(inner) => inner.name(),
        }
    }

    pub async fn translate(
        &self,
        text: &str,
        options: &TranslateOptions,
    ) -> Result<String, ProviderError> {
        match self {
            Provider::Google(inner) => inner.translate(text, options).await,
            Provider::MyMemory(inner) => inner.translate(text, options).await,
            Provider::Fixed(inner) => inner.translate(text, options).await,
        }
    }
}

/// Deterministic offline backend, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct FixedTranslator {
    /// Prepended to every input so the output is distinguishable.
    pub prefix: String,
    /// Inputs containing this needle fail with [`ProviderError::Unsupported`].
    pub fail_contains: Option<String>,
}

impl TranslateBackend for FixedTranslator {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn translate(
        &self,
        text: &str,
        _options: &TranslateOptions,
    ) -> Result<String, ProviderError> {
        if let Some(needle) = &self.fail_contains {
            if text.contains(needle.as_str()) {
                return Err(ProviderError::Unsupported(format!(
                    "input contains {needle:?}"
                )));
            }
        }
        Ok(format!("{}{}", self.prefix, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retryable_failures() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::Quota("used up".into()).is_retryable());
        assert!(!ProviderError::Auth("bad key".into()).is_retryable());
        assert!(!ProviderError::Unsupported("empty".into()).is_retryable());
    }

    #[test]
    fn provider_kind_config_names() {
        let kind: ProviderKind = serde_json::from_str("\"mymemory\"").unwrap();
        assert_eq!(kind, ProviderKind::MyMemory);
        let kind: ProviderKind = serde_json::from_str("\"google\"").unwrap();
        assert_eq!(kind, ProviderKind::Google);
    }

    #[tokio::test]
    async fn fixed_backend_is_deterministic() {
        let backend = FixedTranslator {
            prefix: "[pt] ".to_string(),
            fail_contains: Some("boom".to_string()),
        };
        let options = TranslateOptions::default();
        assert_eq!(
            backend.translate("hello", &options).await.unwrap(),
            "[pt] hello"
        );
        assert!(matches!(
            backend.translate("boom now", &options).await,
            Err(ProviderError::Unsupported(_))
        ));
    }
}
