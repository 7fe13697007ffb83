//! Placeholder token handling.
//!
//! Card text addresses the reader through `{{user}}` and the persona
//! through `{{char}}`. Providers mangle tokens like these, so before a
//! segment is sent out every placeholder is either swapped for a stand-in
//! name (which reads naturally and translates coherently) or masked with
//! an opaque token, and the exchange is reversed afterwards.

use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^{}]+\}\}(?:'s)?").expect("valid placeholder regex"));

static COLLAPSE_OPEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{{3,}").expect("valid open brace regex"));

static COLLAPSE_CLOSE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\}{3,}").expect("valid close brace regex"));

static SPACED_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}\s][^{}]*?)\s*\}\}").expect("valid spaced token regex")
});

static ASSISTANT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{assistant\}\}").expect("valid assistant regex"));

pub const USER_TOKEN: &str = "{{user}}";
pub const CHAR_TOKEN: &str = "{{char}}";

const USER_STAND_IN: &str = "James";
const CHAR_STAND_IN: &str = "Jane";

/// How `{{char}}` and `{{user}}` are rendered for the provider.
#[derive(Debug, Clone, Default)]
pub struct NameOptions {
    /// Replace the canonical tokens with readable names before translation.
    pub substitute_names: bool,
    /// Use the fixed stand-in name instead of the character's real name.
    pub use_stand_in: bool,
    pub character_name: Option<String>,
}

/// A piece of text with its placeholders masked, plus everything needed to
/// put them back after translation.
#[derive(Debug, Clone)]
pub struct ProtectedText {
    masked: String,
    /// Stand-in name paired with the token it replaces, e.g. ("Jane", "{{char}}").
    stand_ins: Vec<(String, String)>,
    /// Opaque marker paired with the original placeholder text.
    opaque: Vec<(String, String)>,
}

impl ProtectedText {
    pub fn protect(text: &str, options: &NameOptions) -> Self {
        let mut stand_ins: Vec<(String, String)> = Vec::new();
        let mut opaque: Vec<(String, String)> = Vec::new();
        let mut counter = 0usize;

        let masked = PLACEHOLDER_REGEX.replace_all(text, |caps: &regex::Captures<'_>| {
            let original = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let possessive = original.ends_with("'s");
            let body = original.strip_suffix("'s").unwrap_or(original);
            let inner = body
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim()
                .to_lowercase();

            let stand_in = match inner.as_str() {
                "user" if options.substitute_names => Some((USER_STAND_IN.to_string(), USER_TOKEN)),
                "char" | "assistant" if options.substitute_names => {
                    if options.use_stand_in {
                        Some((CHAR_STAND_IN.to_string(), CHAR_TOKEN))
                    } else {
                        options
                            .character_name
                            .clone()
                            .map(|name| (name, CHAR_TOKEN))
                    }
                }
                _ => None,
            };

            if let Some((name, token)) = stand_in {
                let rendered = if possessive {
                    format!("{name}'s")
                } else {
                    name
                };
                let restored = if possessive {
                    format!("{token}'s")
                } else {
                    token.to_string()
                };
                let pair = (rendered.clone(), restored);
                if !stand_ins.contains(&pair) {
                    stand_ins.push(pair);
                }
                rendered
            } else {
                let marker = format!("__PH_{counter}__");
                counter += 1;
                opaque.push((marker.clone(), original.to_string()));
                marker
            }
        });

        Self {
            masked: masked.into_owned(),
            stand_ins,
            opaque,
        }
    }

    pub fn masked_text(&self) -> &str {
        &self.masked
    }

    /// Reverses the substitutions on provider output. Stand-ins are matched
    /// case-insensitively since providers routinely re-case names, and the
    /// longest stand-in wins so possessive forms restore before plain ones.
    pub fn restore(&self, translated: &str) -> String {
        let mut result = translated.to_string();

        let mut ordered: Vec<&(String, String)> = self.stand_ins.iter().collect();
        ordered.sort_by_key(|(stand_in, _)| std::cmp::Reverse(stand_in.len()));
        for (stand_in, token) in ordered {
            if let Ok(pattern) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(stand_in))) {
                result = pattern.replace_all(&result, token.as_str()).into_owned();
            }
        }

        for (marker, original) in &self.opaque {
            if let Ok(pattern) = Regex::new(&format!(r"(?i){}", regex::escape(marker))) {
                result = pattern.replace_all(&result, original.as_str()).into_owned();
            }
        }

        fix_malformed_braces(&result)
    }
}

/// Repairs placeholder damage a provider may introduce: duplicated braces,
/// whitespace inside tokens, and the legacy `{{assistant}}` alias.
pub fn fix_malformed_braces(text: &str) -> String {
    let text = COLLAPSE_OPEN_REGEX.replace_all(text, "{{");
    let text = COLLAPSE_CLOSE_REGEX.replace_all(&text, "}}");
    let text = SPACED_TOKEN_REGEX.replace_all(&text, "{{$1}}");
    ASSISTANT_REGEX.replace_all(&text, CHAR_TOKEN).into_owned()
}

pub fn contains_placeholder(text: &str) -> bool {
    PLACEHOLDER_REGEX.is_match(text)
}

/// Byte spans of every placeholder token in `text`.
pub(crate) fn token_spans(text: &str) -> Vec<std::ops::Range<usize>> {
    PLACEHOLDER_REGEX
        .find_iter(text)
        .map(|m| m.range())
        .collect()
}
