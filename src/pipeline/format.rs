//! Post-processing of raw model output into display-ready lists.

use regex::Regex;
use std::sync::LazyLock;

/// Prefix placed before every bullet line.
pub const BULLET: &str = "• ";

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•·‣▪]+|\d{1,3}[.)]|[a-zA-Z][.)](?:\s|$))\s*").expect("valid regex"));
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!;]+(?:\s+|$)").expect("valid regex"));
static QUESTION_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?+(?:\s+|$)").expect("valid regex"));
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("valid regex"));

/// Split model output into one `• `-prefixed line per sentence or line.
///
/// Existing list markers are stripped first so already-bulleted output is not double-marked.
/// Returns an empty string when nothing survives.
pub fn bullet_points(raw: &str) -> String {
    segments(raw)
        .flat_map(|line| {
            SENTENCE_END
                .split(line)
                .map(str::trim)
                .filter(|sentence| has_words(sentence))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .map(|sentence| format!("{BULLET}{sentence}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split model output into one question per line, keeping question marks.
pub fn question_list(raw: &str) -> String {
    segments(raw)
        .flat_map(|line| {
            let mut questions = Vec::new();
            let mut start = 0;
            for found in QUESTION_END.find_iter(line) {
                let question = line[start..found.start()].trim();
                if has_words(question) {
                    questions.push(format!("{question}?"));
                }
                start = found.end();
            }
            let rest = line[start..].trim();
            if has_words(rest) {
                questions.push(rest.to_string());
            }
            questions
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn segments(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines()
        .map(|line| {
            let stripped = LIST_MARKER.find(line).map_or(line, |marker| &line[marker.end()..]);
            stripped.trim()
        })
        .filter(|line| !line.is_empty())
}

fn has_words(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Collapse every whitespace run (newlines included) into a single space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Group sentences of `text` into chunks of at most `max_chars` characters.
///
/// Chunks break on sentence boundaries; a single sentence longer than `max_chars` is split on
/// char boundaries. Expects whitespace-normalized input.
pub fn chunk_sentences(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in sentences(text) {
        for piece in split_long(sentence, max_chars) {
            let piece_len = piece.chars().count();
            if current_len > 0 && current_len + 1 + piece_len > max_chars {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(piece);
            current_len += piece_len;
        }
    }
    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}

fn sentences(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut start = 0;
    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        found.push(text[start..boundary.end()].trim());
        start = boundary.end();
    }
    found.push(text[start..].trim());
    found.retain(|sentence| !sentence.is_empty());
    found
}

fn split_long(sentence: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = sentence;
    while !rest.is_empty() {
        let head = truncate_chars(rest, max_chars);
        pieces.push(head);
        rest = &rest[head.len()..];
    }
    pieces
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
