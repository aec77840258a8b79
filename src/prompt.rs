//! Prompt construction and output sanitization.
//!
//! Pure functions, no external state. Regex patterns are compile-time
//! constants with bounded quantifiers — no unbounded repetition over
//! unbounded input, so sanitization is linear in input length.

use once_cell::sync::Lazy;
use regex::Regex;

const MAX_INPUT_BYTES: usize = 50 * 1024;
const OVERFLOW_FALLBACK: &str = "## Summary unavailable\n\n- Model output exceeded the size limit and was discarded.\n";

const HEADERS: [&str; 4] = [
    "Key topics discussed",
    "Important decisions or conclusions",
    "Action items or next steps",
    "Notable reactions or responses",
];

/// Builds the fixed summarization prompt template around already-anonymized,
/// already-formatted conversation text.
pub fn build_prompt(formatted_conversation: &str) -> String {
    format!(
        "Summarize the following group chat conversation in markdown, using exactly these four sections:\n\n\
         ## Key topics discussed\n- ...\n\n\
         ## Important decisions or conclusions\n- ...\n\n\
         ## Action items or next steps\n- ...\n\n\
         ## Notable reactions or responses\n- ...\n\n\
         Each section should contain bullet points. Omit a bullet if nothing applies to that section.\n\n\
         Conversation:\n{formatted_conversation}"
    )
}

static HEADER_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    HEADERS
        .iter()
        .map(|h| {
            let escaped = regex::escape(h);
            let pattern = format!(r"(?m)^(?:#{{1,6}}\s*|\*\*)?\s*{escaped}\s*(?:\*\*)?:?\s*$");
            (
                Regex::new(&pattern).expect("static header pattern is valid"),
                *h,
            )
        })
        .collect()
});

static NESTED_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(-\s[^\n:]{0,200}):\n[ \t]{1,8}-\s([^\n]{0,400})$").expect("static pattern"));

static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static pattern"));

/// Normalizes raw model output into the canonical four-header markdown shape.
pub fn sanitize(raw: &str) -> String {
    if raw.len() > MAX_INPUT_BYTES {
        return OVERFLOW_FALLBACK.to_owned();
    }

    let mut text = raw.to_owned();
    for (pattern, header) in HEADER_PATTERNS.iter() {
        text = pattern.replace_all(&text, format!("## {header}\n")).into_owned();
    }

    text = NESTED_BULLET.replace_all(&text, "$1: $2").into_owned();
    text = EXCESS_NEWLINES.replace_all(&text, "\n\n").into_owned();
    text
}
