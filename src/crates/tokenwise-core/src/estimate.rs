//! Language-aware token estimation
//!
//! AI providers bill by token, but the exact tokenizer differs per vendor.
//! This heuristic weighs the three character classes that dominate mixed
//! Chinese/English prompts: CJK ideographs cost roughly 0.6 tokens each,
//! standalone Latin words roughly 0.75, and punctuation roughly 0.25.

use crate::request::AiRequest;
use crate::types::TaskType;

/// Weight per CJK ideograph (U+4E00..=U+9FFF)
pub const CJK_CHAR_WEIGHT: f64 = 0.6;
/// Weight per standalone Latin word
pub const LATIN_WORD_WEIGHT: f64 = 0.75;
/// Weight per punctuation character
pub const PUNCTUATION_WEIGHT: f64 = 0.25;

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

fn is_punctuation(c: char) -> bool {
    !is_word_char(c) && !c.is_whitespace()
}

/// Estimate the token count of a text
///
/// Empty text estimates to 0; any other text estimates to at least 1. A Latin
/// letter run counts as a word only when bounded by non-word characters, so
/// runs glued to digits, underscores, or CJK text are not counted.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }

    let chars: Vec<char> = text.chars().collect();
    let mut cjk_chars = 0u64;
    let mut latin_words = 0u64;
    let mut punctuation = 0u64;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() {
            let starts_at_boundary = i == 0 || !is_word_char(chars[i - 1]);
            let mut j = i;
            while j < chars.len() && chars[j].is_ascii_alphabetic() {
                j += 1;
            }
            let ends_at_boundary = j == chars.len() || !is_word_char(chars[j]);
            if starts_at_boundary && ends_at_boundary {
                latin_words += 1;
            }
            i = j;
            continue;
        }
        if is_cjk(c) {
            cjk_chars += 1;
        } else if is_punctuation(c) {
            punctuation += 1;
        }
        i += 1;
    }

    let weighted = cjk_chars as f64 * CJK_CHAR_WEIGHT
        + latin_words as f64 * LATIN_WORD_WEIGHT
        + punctuation as f64 * PUNCTUATION_WEIGHT;
    (weighted as u64).max(1)
}

/// Per-task fixed overhead covering system prompts and response framing
pub fn task_overhead(task_type: TaskType) -> u64 {
    match task_type {
        TaskType::TextGeneration => 10,
        TaskType::ContentAnalysis => 20,
        TaskType::CommentaryGeneration => 30,
        TaskType::MonologueGeneration => 25,
        TaskType::SceneAnalysis => 40,
        TaskType::SubtitleGeneration => 15,
        TaskType::EditingSuggestion => 35,
        TaskType::ContentClassification => 25,
    }
}

/// Estimate the total token cost of a request
///
/// Covers the content, the JSON-serialized context and parameters when
/// present, and the per-task overhead. Never estimates below 1.
pub fn estimate_request_tokens(request: &AiRequest) -> u64 {
    let mut total = estimate_tokens(&request.content);
    if !request.context.is_empty() {
        let context_json = serde_json::to_string(&request.context).unwrap_or_default();
        total += estimate_tokens(&context_json);
    }
    if !request.parameters.is_empty() {
        let parameters_json = serde_json::to_string(&request.parameters).unwrap_or_default();
        total += estimate_tokens(&parameters_json);
    }
    total += task_overhead(request.task_type);
    total.max(1)
}
