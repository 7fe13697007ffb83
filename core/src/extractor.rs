//! Segment extraction.
//!
//! Walks a card record (presets reuse the same text splitting) and yields
//! the translatable segments in document order. Each segment is an ordered
//! list of pieces; literal pieces reassemble byte-for-byte around the
//! translated ones, so reinsertion can never disturb surrounding text.

use crate::codec::{CardData, CardRecord};
use crate::placeholder;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::ops::Range;

static IMAGE_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid image link regex"));

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:https?://|www\.)\S+").expect("valid url regex"));

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});

static CODE_BLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\s\S]*?```").expect("valid code block regex"));

static INLINE_CODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`[^`\n]+`").expect("valid inline code regex"));

/// Bracket kinds that can be switched into wrapped-translate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BracketKind {
    Angle,
    Paren,
    Square,
}

impl BracketKind {
    pub fn open(self) -> char {
        match self {
            BracketKind::Angle => '<',
            BracketKind::Paren => '(',
            BracketKind::Square => '[',
        }
    }

    pub fn close(self) -> char {
        match self {
            BracketKind::Angle => '>',
            BracketKind::Paren => ')',
            BracketKind::Square => ']',
        }
    }
}

/// Card text fields the extractor knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardField {
    Name,
    Description,
    Personality,
    Scenario,
    FirstMes,
    MesExample,
    SystemPrompt,
    PostHistoryInstructions,
    CreatorNotes,
}

impl CardField {
    pub fn as_str(self) -> &'static str {
        match self {
            CardField::Name => "name",
            CardField::Description => "description",
            CardField::Personality => "personality",
            CardField::Scenario => "scenario",
            CardField::FirstMes => "first_mes",
            CardField::MesExample => "mes_example",
            CardField::SystemPrompt => "system_prompt",
            CardField::PostHistoryInstructions => "post_history_instructions",
            CardField::CreatorNotes => "creator_notes",
        }
    }
}

/// Every text field except `name`, which is only eligible when the
/// translate-name option is on.
const TEXT_FIELDS: [CardField; 8] = [
    CardField::Description,
    CardField::Personality,
    CardField::Scenario,
    CardField::FirstMes,
    CardField::MesExample,
    CardField::SystemPrompt,
    CardField::PostHistoryInstructions,
    CardField::CreatorNotes,
];

/// Where a segment reinserts into the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    Root(CardField),
    Data(CardField),
    Greeting { in_data: bool, index: usize },
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Root(field) => write!(f, "{}", field.as_str()),
            FieldPath::Data(field) => write!(f, "data.{}", field.as_str()),
            FieldPath::Greeting { in_data: false, index } => {
                write!(f, "alternate_greetings[{index}]")
            }
            FieldPath::Greeting { in_data: true, index } => {
                write!(f, "data.alternate_greetings[{index}]")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub translate_name: bool,
    pub translate_angle: bool,
    pub translate_parentheses: bool,
    pub translate_square: bool,
    /// Soft per-piece length cap; longer text is chunked at sentence or
    /// newline boundaries before it reaches a provider.
    pub max_segment_len: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            translate_name: false,
            translate_angle: false,
            translate_parentheses: false,
            translate_square: false,
            max_segment_len: 4500,
        }
    }
}

impl SegmentOptions {
    fn enabled_kinds(&self) -> Vec<BracketKind> {
        let mut kinds = Vec::new();
        if self.translate_angle {
            kinds.push(BracketKind::Angle);
        }
        if self.translate_parentheses {
            kinds.push(BracketKind::Paren);
        }
        if self.translate_square {
            kinds.push(BracketKind::Square);
        }
        kinds
    }
}

/// In-order piece of a field: either copied verbatim or sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Literal(String),
    Translate {
        text: String,
        bracket: Option<BracketKind>,
    },
}

/// One translatable field (or greeting) of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub path: FieldPath,
    pub text: String,
    pub pieces: Vec<Piece>,
    pub has_placeholder: bool,
}

/// Extraction result: segments in document order plus the fields skipped
/// because they were empty or whitespace-only.
#[derive(Debug, Default)]
pub struct Extraction {
    pub segments: Vec<Segment>,
    pub skipped: Vec<FieldPath>,
}

pub fn extract_record(record: &CardRecord, options: &SegmentOptions) -> Extraction {
    let mut out = Extraction::default();

    if options.translate_name {
        visit_field(&mut out, FieldPath::Root(CardField::Name), record.name.as_deref(), options);
    }
    for field in TEXT_FIELDS {
        visit_field(&mut out, FieldPath::Root(field), root_slot(record, field), options);
    }
    if let Some(greetings) = &record.alternate_greetings {
        for (index, greeting) in greetings.iter().enumerate() {
            visit_field(
                &mut out,
                FieldPath::Greeting { in_data: false, index },
                Some(greeting),
                options,
            );
        }
    }

    if let Some(data) = &record.data {
        if options.translate_name {
            visit_field(&mut out, FieldPath::Data(CardField::Name), data.name.as_deref(), options);
        }
        for field in TEXT_FIELDS {
            visit_field(&mut out, FieldPath::Data(field), data_slot(data, field), options);
        }
        if let Some(greetings) = &data.alternate_greetings {
            for (index, greeting) in greetings.iter().enumerate() {
                visit_field(
                    &mut out,
                    FieldPath::Greeting { in_data: true, index },
                    Some(greeting),
                    options,
                );
            }
        }
    }

    out
}

fn visit_field(out: &mut Extraction, path: FieldPath, text: Option<&str>, options: &SegmentOptions) {
    let Some(text) = text else {
        return;
    };
    if text.trim().is_empty() {
        out.skipped.push(path);
        return;
    }
    let pieces = split_pieces(text, options);
    out.segments.push(Segment {
        has_placeholder: placeholder::contains_placeholder(text),
        path,
        text: text.to_string(),
        pieces,
    });
}

/// Splits a field into literal and translatable pieces.
///
/// When an enabled bracket kind has at least one balanced range, only those
/// ranges translate and everything around them is literal. Otherwise the
/// whole field translates as plain text (minus protected spans).
pub fn split_pieces(text: &str, options: &SegmentOptions) -> Vec<Piece> {
    let ranges = wrapped_ranges(text, options);
    let mut pieces = Vec::new();

    if ranges.is_empty() {
        push_translatable(text, None, options, &mut pieces);
        return pieces;
    }

    let mut cursor = 0;
    for (range, kind) in ranges {
        if range.start > cursor {
            pieces.push(Piece::Literal(text[cursor..range.start].to_string()));
        }
        push_translatable(&text[range.clone()], Some(kind), options, &mut pieces);
        cursor = range.end;
    }
    if cursor < text.len() {
        pieces.push(Piece::Literal(text[cursor..].to_string()));
    }
    pieces
}

/// Concatenates pieces back into field text. With untranslated pieces this
/// is the identity function over the original input.
pub fn reassemble(pieces: &[Piece]) -> String {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Translate { text, .. } => out.push_str(text),
        }
    }
    out
}

/// Balanced innermost ranges (content only, delimiters excluded) for every
/// enabled bracket kind, non-overlapping and in document order. Unbalanced
/// brackets are reported and otherwise ignored.
fn wrapped_ranges(text: &str, options: &SegmentOptions) -> Vec<(Range<usize>, BracketKind)> {
    let mut candidates: Vec<(Range<usize>, BracketKind)> = Vec::new();

    for kind in options.enabled_kinds() {
        let mut open: Option<usize> = None;
        let mut stray_close = false;
        for (index, ch) in text.char_indices() {
            if ch == kind.open() {
                open = Some(index);
            } else if ch == kind.close() {
                match open.take() {
                    Some(start) => candidates.push((start + 1..index, kind)),
                    None => stray_close = true,
                }
            }
        }
        if open.is_some() || stray_close {
            warn!(
                "unbalanced '{}{}' pair left untouched in {:?}...",
                kind.open(),
                kind.close(),
                text.chars().take(32).collect::<String>()
            );
        }
    }

    candidates.sort_by_key(|(range, _)| range.start);
    let mut merged: Vec<(Range<usize>, BracketKind)> = Vec::new();
    for (range, kind) in candidates {
        // Delimiter spans must not overlap the previously accepted range.
        if let Some((last, _)) = merged.last() {
            if range.start < last.end + 2 {
                continue;
            }
        }
        merged.push((range, kind));
    }
    merged
}

fn push_translatable(
    text: &str,
    bracket: Option<BracketKind>,
    options: &SegmentOptions,
    out: &mut Vec<Piece>,
) {
    let spans = protected_spans(text);
    let mut cursor = 0;
    for span in spans {
        if span.start > cursor {
            push_chunked(&text[cursor..span.start], bracket, options, out);
        }
        out.push(Piece::Literal(text[span.clone()].to_string()));
        cursor = span.end;
    }
    if cursor < text.len() {
        push_chunked(&text[cursor..], bracket, options, out);
    }
}

fn push_chunked(
    text: &str,
    bracket: Option<BracketKind>,
    options: &SegmentOptions,
    out: &mut Vec<Piece>,
) {
    if text.is_empty() {
        return;
    }
    if text.trim().is_empty() {
        out.push(Piece::Literal(text.to_string()));
        return;
    }
    if text.len() <= options.max_segment_len {
        out.push(Piece::Translate {
            text: text.to_string(),
            bracket,
        });
        return;
    }
    for chunk in chunk_text(text, options.max_segment_len) {
        if chunk.trim().is_empty() {
            out.push(Piece::Literal(chunk));
        } else {
            out.push(Piece::Translate {
                text: chunk,
                bracket,
            });
        }
    }
}

/// Spans that never translate regardless of configuration: markdown image
/// links, URLs, e-mail addresses, and code.
fn protected_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    for regex in [
        &*CODE_BLOCK_REGEX,
        &*IMAGE_LINK_REGEX,
        &*INLINE_CODE_REGEX,
        &*URL_REGEX,
        &*EMAIL_REGEX,
    ] {
        spans.extend(regex.find_iter(text).map(|m| m.range()));
    }
    spans.sort_by_key(|span| span.start);
    let mut merged: Vec<Range<usize>> = Vec::new();
    for span in spans {
        if let Some(last) = merged.last() {
            if span.start < last.end {
                continue;
            }
        }
        merged.push(span);
    }
    merged
}

/// Splits `text` into chunks of at most roughly `max` bytes, cutting at
/// newline or sentence boundaries where possible. Chunks concatenate back
/// to the exact input, and a cut never lands inside a placeholder token.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let cut = find_split(rest, max);
        if cut == 0 || cut >= rest.len() {
            break;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn find_split(text: &str, max: usize) -> usize {
    let limit = floor_char_boundary(text, max.min(text.len()));
    let window = &text[..limit];

    if let Some(pos) = window.rfind('\n') {
        if pos + 1 > 0 {
            return avoid_placeholder(text, pos + 1);
        }
    }

    let mut best = None;
    for (index, byte) in window.bytes().enumerate() {
        if matches!(byte, b'.' | b'!' | b'?') {
            if let Some(next) = text[index + 1..].chars().next() {
                if next.is_whitespace() {
                    best = Some(index + 1 + next.len_utf8());
                }
            }
        }
    }
    if let Some(cut) = best {
        if cut < text.len() {
            return avoid_placeholder(text, cut);
        }
    }

    avoid_placeholder(text, limit)
}

fn avoid_placeholder(text: &str, cut: usize) -> usize {
    for span in placeholder::token_spans(text) {
        if cut > span.start && cut < span.end {
            return if span.start > 0 { span.start } else { span.end };
        }
    }
    cut
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn root_slot(record: &CardRecord, field: CardField) -> Option<&str> {
    match field {
        CardField::Name => record.name.as_deref(),
        CardField::Description => record.description.as_deref(),
        CardField::Personality => record.personality.as_deref(),
        CardField::Scenario => record.scenario.as_deref(),
        CardField::FirstMes => record.first_mes.as_deref(),
        CardField::MesExample => record.mes_example.as_deref(),
        CardField::SystemPrompt => record.system_prompt.as_deref(),
        CardField::PostHistoryInstructions => record.post_history_instructions.as_deref(),
        CardField::CreatorNotes => record.creator_notes.as_deref(),
    }
}

fn data_slot(data: &CardData, field: CardField) -> Option<&str> {
    match field {
        CardField::Name => data.name.as_deref(),
        CardField::Description => data.description.as_deref(),
        CardField::Personality => data.personality.as_deref(),
        CardField::Scenario => data.scenario.as_deref(),
        CardField::FirstMes => data.first_mes.as_deref(),
        CardField::MesExample => data.mes_example.as_deref(),
        CardField::SystemPrompt => data.system_prompt.as_deref(),
        CardField::PostHistoryInstructions => data.post_history_instructions.as_deref(),
        CardField::CreatorNotes => data.creator_notes.as_deref(),
    }
}

/// Current text of the field addressed by `path`, if present.
pub fn field_text<'a>(record: &'a CardRecord, path: &FieldPath) -> Option<&'a str> {
    match path {
        FieldPath::Root(field) => root_slot(record, *field),
        FieldPath::Data(field) => record
            .data
            .as_ref()
            .and_then(|data| data_slot(data, *field)),
        FieldPath::Greeting { in_data: false, index } => record
            .alternate_greetings
            .as_ref()
            .and_then(|greetings| greetings.get(*index))
            .map(String::as_str),
        FieldPath::Greeting { in_data: true, index } => record
            .data
            .as_ref()
            .and_then(|data| data.alternate_greetings.as_ref())
            .and_then(|greetings| greetings.get(*index))
            .map(String::as_str),
    }
}

/// Overwrites the field addressed by `path`. Paths always come from
/// [`extract_record`], so the slot is known to exist; a vanished slot is
/// ignored rather than invented.
pub fn set_field_text(record: &mut CardRecord, path: &FieldPath, value: String) {
    let slot = match path {
        FieldPath::Root(field) => root_slot_mut(record, *field),
        FieldPath::Data(field) => record
            .data
            .as_mut()
            .and_then(|data| data_slot_mut(data, *field)),
        FieldPath::Greeting { in_data: false, index } => record
            .alternate_greetings
            .as_mut()
            .and_then(|greetings| greetings.get_mut(*index)),
        FieldPath::Greeting { in_data: true, index } => record
            .data
            .as_mut()
            .and_then(|data| data.alternate_greetings.as_mut())
            .and_then(|greetings| greetings.get_mut(*index)),
    };
    if let Some(slot) = slot {
        *slot = value;
    }
}

fn root_slot_mut(record: &mut CardRecord, field: CardField) -> Option<&mut String> {
    match field {
        CardField::Name => record.name.as_mut(),
        CardField::Description => record.description.as_mut(),
        CardField::Personality => record.personality.as_mut(),
        CardField::Scenario => record.scenario.as_mut(),
        CardField::FirstMes => record.first_mes.as_mut(),
        CardField::MesExample => record.mes_example.as_mut(),
        CardField::SystemPrompt => record.system_prompt.as_mut(),
        CardField::PostHistoryInstructions => record.post_history_instructions.as_mut(),
        CardField::CreatorNotes => record.creator_notes.as_mut(),
    }
}

fn data_slot_mut(data: &mut CardData, field: CardField) -> Option<&mut String> {
    match field {
        CardField::Name => data.name.as_mut(),
        CardField::Description => data.description.as_mut(),
        CardField::Personality => data.personality.as_mut(),
        CardField::Scenario => data.scenario.as_mut(),
        CardField::FirstMes => data.first_mes.as_mut(),
        CardField::MesExample => data.mes_example.as_mut(),
        CardField::SystemPrompt => data.system_prompt.as_mut(),
        CardField::PostHistoryInstructions => data.post_history_instructions.as_mut(),
        CardField::CreatorNotes => data.creator_notes.as_mut(),
    }
}
