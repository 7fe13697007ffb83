//! Translation orchestration.
//!
//! Drives one record through extract, protect, translate, restore, and
//! reinsert. Segments fail independently: a provider error marks that
//! segment failed and keeps its original text, while the rest of the
//! record still translates.

use crate::codec::{self, CardRecord};
use crate::extractor::{self, Piece, Segment, SegmentOptions};
use crate::placeholder::{NameOptions, ProtectedText};
use crate::providers::retry::{with_backoff, RetryPolicy};
use crate::providers::{Provider, ProviderError, TranslateOptions};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};

static NO_CANCEL: AtomicBool = AtomicBool::new(false);

static SPACE_BEFORE_PUNCT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" +([,.!?;:])").expect("valid punctuation regex"));

static MULTI_SPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"  +").expect("valid space regex"));

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentStatus {
    Translated,
    /// Empty field, or the provider returned the input unchanged.
    SkippedUnchanged,
    Failed(String),
}

/// Per-segment outcome of one record translation, in document order.
#[derive(Debug, Default)]
pub struct TranslationReport {
    pub statuses: Vec<(String, SegmentStatus)>,
    pub cancelled: bool,
}

impl TranslationReport {
    pub fn translated(&self) -> usize {
        self.count(|status| matches!(status, SegmentStatus::Translated))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, SegmentStatus::SkippedUnchanged))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, SegmentStatus::Failed(_)))
    }

    /// True when every extracted segment was handled and none failed.
    pub fn fully_translated(&self) -> bool {
        !self.cancelled && self.failed() == 0
    }

    fn count(&self, matcher: impl Fn(&SegmentStatus) -> bool) -> usize {
        self.statuses
            .iter()
            .filter(|(_, status)| matcher(status))
            .count()
    }
}

pub struct Orchestrator {
    provider: Provider,
    segment_options: SegmentOptions,
    name_options: NameOptions,
    translate_options: TranslateOptions,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        provider: Provider,
        segment_options: SegmentOptions,
        name_options: NameOptions,
        translate_options: TranslateOptions,
    ) -> Self {
        Self {
            provider,
            segment_options,
            name_options,
            translate_options,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn translate_record(&self, record: &mut CardRecord) -> TranslationReport {
        self.translate_record_cancelable(record, &NO_CANCEL).await
    }

    /// Like [`translate_record`](Self::translate_record), but checks the
    /// cancel flag between segments. Already-translated segments stay
    /// applied; the report says how far the run got.
    pub async fn translate_record_cancelable(
        &self,
        record: &mut CardRecord,
        cancel: &AtomicBool,
    ) -> TranslationReport {
        let mut report = TranslationReport::default();

        let mut name_options = self.name_options.clone();
        if name_options.substitute_names
            && !name_options.use_stand_in
            && name_options.character_name.is_none()
        {
            name_options.character_name = codec::character_name(record).map(str::to_string);
        }

        let extraction = extractor::extract_record(record, &self.segment_options);
        for path in extraction.skipped {
            report
                .statuses
                .push((path.to_string(), SegmentStatus::SkippedUnchanged));
        }

        for segment in extraction.segments {
            if cancel.load(Ordering::SeqCst) {
                report.cancelled = true;
                info!(
                    "translation cancelled after {} segments",
                    report.statuses.len()
                );
                break;
            }
            let label = segment.path.to_string();
            let (updated, errors) = self.translate_segment(&segment, &name_options).await;
            if updated != segment.text {
                extractor::set_field_text(record, &segment.path, updated.clone());
            }
            let status = if let Some(reason) = errors.first() {
                warn!(
                    "segment {label}: {} of {} pieces kept original text: {reason}",
                    errors.len(),
                    segment.pieces.len()
                );
                SegmentStatus::Failed(reason.clone())
            } else if updated == segment.text {
                SegmentStatus::SkippedUnchanged
            } else {
                SegmentStatus::Translated
            };
            report.statuses.push((label, status));
        }

        report
    }

    /// Translates one free-standing string under the same bracket modes,
    /// protected spans, masking, retry, and chunking rules fields get.
    /// Used for preset prompt text. Failed pieces keep their original
    /// text and are reported alongside the reassembled result.
    pub async fn translate_text(&self, text: &str) -> (String, Vec<String>) {
        let pieces = extractor::split_pieces(text, &self.segment_options);
        self.translate_pieces(pieces, &self.name_options).await
    }

    async fn translate_segment(
        &self,
        segment: &Segment,
        name_options: &NameOptions,
    ) -> (String, Vec<String>) {
        self.translate_pieces(segment.pieces.clone(), name_options)
            .await
    }

    /// Translates each piece independently; a failed piece keeps its
    /// original text and the field still reassembles around it.
    async fn translate_pieces(
        &self,
        mut pieces: Vec<Piece>,
        name_options: &NameOptions,
    ) -> (String, Vec<String>) {
        let mut errors = Vec::new();
        for piece in &mut pieces {
            if let Piece::Translate { text, .. } = piece {
                match self.translate_piece(text, name_options).await {
                    Ok(updated) => *text = updated,
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }
        (extractor::reassemble(&pieces), errors)
    }

    async fn translate_piece(
        &self,
        text: &str,
        name_options: &NameOptions,
    ) -> Result<String, ProviderError> {
        let inner = text.trim();
        if inner.is_empty() {
            return Ok(text.to_string());
        }
        // Providers eat surrounding whitespace, so it is carried here.
        let leading = &text[..text.len() - text.trim_start().len()];
        let trailing = &text[text.trim_end().len()..];

        let protected = ProtectedText::protect(inner, name_options);
        let masked = protected.masked_text();
        let provider = &self.provider;
        let options = &self.translate_options;
        let translated = with_backoff(self.retry, move || async move {
            provider.translate(masked, options).await
        })
        .await?;

        let restored = protected.restore(translated.trim());
        Ok(format!("{leading}{}{trailing}", tidy_translation(&restored)))
    }
}

/// Cleans up spacing damage providers commonly introduce.
pub fn tidy_translation(text: &str) -> String {
    let text = SPACE_BEFORE_PUNCT_REGEX.replace_all(text, "$1");
    MULTI_SPACE_REGEX.replace_all(&text, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FixedTranslator;
    use serde_json::json;
    use std::time::Duration;

    fn fixed_orchestrator(prefix: &str, fail_contains: Option<&str>) -> Orchestrator {
        let provider = Provider::Fixed(FixedTranslator {
            prefix: prefix.to_string(),
            fail_contains: fail_contains.map(str::to_string),
        });
        let name_options = NameOptions {
            substitute_names: true,
            use_stand_in: true,
            character_name: None,
        };
        Orchestrator::new(
            provider,
            SegmentOptions::default(),
            name_options,
            TranslateOptions::default(),
        )
        .with_retry(RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_retries: 1,
        })
    }

    fn record(value: serde_json::Value) -> CardRecord {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn translates_every_eligible_field() {
        let mut card = record(json!({
            "description": "A quiet scholar.",
            "data": {"first_mes": "Welcome, traveler."}
        }));
        let report = fixed_orchestrator("[pt] ", None)
            .translate_record(&mut card)
            .await;

        assert_eq!(report.translated(), 2);
        assert!(report.fully_translated());
        assert_eq!(card.description.as_deref(), Some("[pt] A quiet scholar."));
        assert_eq!(
            card.data.unwrap().first_mes.as_deref(),
            Some("[pt] Welcome, traveler.")
        );
    }

    #[tokio::test]
    async fn failed_segment_keeps_original_text() {
        let mut card = record(json!({
            "description": "Fine text.",
            "personality": "poison pill"
        }));
        let report = fixed_orchestrator("[pt] ", Some("poison"))
            .translate_record(&mut card)
            .await;

        assert_eq!(report.translated(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.fully_translated());
        assert_eq!(card.description.as_deref(), Some("[pt] Fine text."));
        assert_eq!(card.personality.as_deref(), Some("poison pill"));
    }

    #[tokio::test]
    async fn failed_piece_keeps_only_its_own_text() {
        let orchestrator = Orchestrator::new(
            Provider::Fixed(FixedTranslator {
                prefix: "[pt] ".to_string(),
                fail_contains: Some("poison".to_string()),
            }),
            SegmentOptions {
                translate_angle: true,
                ..SegmentOptions::default()
            },
            NameOptions::default(),
            TranslateOptions::default(),
        );

        let mut card = record(json!({"description": "A <good> and <poison> mix"}));
        let report = orchestrator.translate_record(&mut card).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(
            card.description.as_deref(),
            Some("A <[pt] good> and <poison> mix")
        );
    }

    #[tokio::test]
    async fn free_text_honors_bracket_configuration() {
        let orchestrator = Orchestrator::new(
            Provider::Fixed(FixedTranslator {
                prefix: "[pt] ".to_string(),
                fail_contains: None,
            }),
            SegmentOptions {
                translate_angle: true,
                ..SegmentOptions::default()
            },
            NameOptions::default(),
            TranslateOptions::default(),
        );
        let (updated, errors) = orchestrator.translate_text("Keep <this> only").await;
        assert!(errors.is_empty());
        assert_eq!(updated, "Keep <[pt] this> only");
    }

    #[tokio::test]
    async fn placeholders_survive_the_round_trip() {
        let mut card = record(json!({
            "first_mes": "{{char}} waves at {{user}}'s horse."
        }));
        let report = fixed_orchestrator("[pt] ", None)
            .translate_record(&mut card)
            .await;

        assert_eq!(report.translated(), 1);
        assert_eq!(
            card.first_mes.as_deref(),
            Some("[pt] {{char}} waves at {{user}}'s horse.")
        );
    }

    #[tokio::test]
    async fn unchanged_output_counts_as_skipped() {
        let mut card = record(json!({"description": "echo me"}));
        let report = fixed_orchestrator("", None).translate_record(&mut card).await;

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.translated(), 0);
        assert_eq!(card.description.as_deref(), Some("echo me"));
    }

    #[tokio::test]
    async fn empty_fields_report_as_skipped() {
        let mut card = record(json!({"description": "  ", "scenario": "A tavern."}));
        let report = fixed_orchestrator("[pt] ", None)
            .translate_record(&mut card)
            .await;

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.translated(), 1);
    }

    #[tokio::test]
    async fn cancel_flag_stops_between_segments() {
        let mut card = record(json!({
            "description": "one",
            "personality": "two"
        }));
        let cancel = AtomicBool::new(true);
        let report = fixed_orchestrator("[pt] ", None)
            .translate_record_cancelable(&mut card, &cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.translated(), 0);
        assert_eq!(card.description.as_deref(), Some("one"));
    }

    #[test]
    fn tidies_provider_spacing() {
        assert_eq!(tidy_translation("Olá , mundo  !"), "Olá, mundo!");
        assert_eq!(tidy_translation("a  b   c"), "a b c");
    }
}
