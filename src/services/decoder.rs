//! Recovers structured JSON from free-text model responses.
//!
//! [`decode`] is total: whatever the model sends back, callers get a JSON
//! value shaped like an analysis result. Recovery is an ordered chain of pure
//! strategies; the first one that yields a structural value wins:
//!
//! 1. parse the isolated candidate as-is
//! 2. parse after conservative repair (trailing commas, line endings, tabs)
//! 3. parse after aggressive repair (control chars, bare keys, single quotes)
//! 4. scrape device counts with regular expressions
//!
//! If all of them fail the result is [`empty_result`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Notes marker on results assembled by the regex fallback.
pub const FALLBACK_MARKER: &str = "extracted-via-fallback";

/// Counts at or above this are treated as noise by the regex fallback.
const MAX_SCRAPED_COUNT: u64 = 10_000;

static LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[A-Za-z0-9_-]*\s*").expect("valid regex"));
static TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").expect("valid regex"));
static FENCE_OPENING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("valid regex"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*,\s*([}\]])").expect("valid regex"));
static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1F\x7F]").expect("valid regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,])\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*:").expect("valid regex"));
static SINGLE_QUOTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,])\s*'([^']*)'\s*:").expect("valid regex"));
static SINGLE_QUOTED_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\s*'([^']*)'").expect("valid regex"));
static SUMMARY_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r#""summary"\s*:"#).expect("valid regex"));
static QUOTED_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"{}\[\]]+)"\s*:\s*(\d+)"#).expect("valid regex"));
static KNOWN_DEVICE_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)"(Data Outlet|Voice Outlet|WAP|Smoke Detector|Card Reader|Dome Camera|Horn.?Strobe|Pull Station|REX|Door Contact)"\s*:\s*(\d+)"#,
    )
    .expect("valid regex")
});

/// Which strategy produced the decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    Direct,
    Repaired,
    AggressiveRepair,
    RegexFallback,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub strategy: DecodeStrategy,
}

impl Decoded {
    /// True when the value did not come from a successful JSON parse.
    pub fn used_fallback(&self) -> bool {
        matches!(
            self.strategy,
            DecodeStrategy::RegexFallback | DecodeStrategy::Empty
        )
    }

    /// Short note for result metadata when a degraded path was taken.
    pub fn note(&self) -> Option<&'static str> {
        match self.strategy {
            DecodeStrategy::RegexFallback => Some("Counts extracted via fallback"),
            DecodeStrategy::Empty => Some("Could not parse model response - manual review required"),
            _ => None,
        }
    }
}

type Strategy = fn(&str) -> Option<Value>;

const STRATEGIES: &[(DecodeStrategy, Strategy)] = &[
    (DecodeStrategy::Direct, parse_direct),
    (DecodeStrategy::Repaired, parse_repaired),
    (DecodeStrategy::AggressiveRepair, parse_aggressive),
    (DecodeStrategy::RegexFallback, extract_counts_by_pattern),
];

/// Decodes a model response. Never fails.
pub fn decode(text: &str) -> Decoded {
    for (strategy, run) in STRATEGIES {
        if let Some(value) = run(text) {
            match strategy {
                DecodeStrategy::Direct => {}
                DecodeStrategy::RegexFallback => {
                    tracing::warn!(len = text.len(), "Model response unparseable, counts scraped via regex")
                }
                _ => tracing::debug!(strategy = ?strategy, "Model response parsed after repair"),
            }
            return Decoded {
                value,
                strategy: *strategy,
            };
        }
    }

    tracing::error!(
        len = text.len(),
        preview = %preview(text),
        "Could not parse model response, returning empty result"
    );
    Decoded {
        value: empty_result(),
        strategy: DecodeStrategy::Empty,
    }
}

/// Well-formed result used when nothing could be recovered.
pub fn empty_result() -> Value {
    json!({
        "devices": [],
        "symbols": [],
        "summary": {},
        "codeCompliance": {
            "status": "UNKNOWN",
            "violations": [],
            "notes": "Analysis failed - manual review required"
        }
    })
}

fn preview(text: &str) -> String {
    text.chars().take(300).collect()
}

// ============================================================================
// Candidate isolation
// ============================================================================

/// Removes a fence wrapping the whole response.
pub fn strip_outer_fence(text: &str) -> String {
    let without_leading = LEADING_FENCE.replace(text, "");
    TRAILING_FENCE
        .replace(&without_leading, "")
        .trim()
        .to_string()
}

/// JSON body of the first fenced block whose contents open with `{` or `[`.
///
/// The body ends where its brackets balance, so fences quoted inside JSON
/// strings do not cut it short. A body that never balances runs to the next
/// fence.
pub fn find_fenced_block(text: &str) -> Option<String> {
    FENCE_OPENING.find_iter(text).find_map(|fence| {
        let body = text[fence.end()..].trim_start();
        if !body.starts_with(|c: char| c == '{' || c == '[') {
            return None;
        }
        let block = match balanced_span(body) {
            Some(span) => span,
            None => body.find("```").map_or(body, |end| &body[..end]).trim_end(),
        };
        Some(block.to_string())
    })
}

fn structural_start(text: &str) -> Option<usize> {
    text.find(|c: char| c == '{' || c == '[')
}

/// The first balanced `{...}` / `[...]` span, ignoring brackets inside
/// double-quoted strings. `None` when the text is truncated mid-structure.
pub fn balanced_span(text: &str) -> Option<&str> {
    let start = structural_start(text)?;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Narrows a raw response down to the text most likely to be the JSON payload.
pub fn isolate_candidate(text: &str) -> String {
    let mut candidate = strip_outer_fence(text);
    if !candidate.starts_with(|c: char| c == '{' || c == '[') {
        if let Some(block) = find_fenced_block(text) {
            candidate = block;
        }
    }
    match balanced_span(&candidate) {
        Some(span) => span.to_string(),
        // Truncated output: keep everything from the first bracket on
        None => match structural_start(&candidate) {
            Some(start) => candidate[start..].to_string(),
            None => candidate,
        },
    }
}

// ============================================================================
// Repairs
// ============================================================================

pub fn conservative_repair(candidate: &str) -> String {
    let normalised = candidate.replace("\r\n", "\n").replace('\t', " ");
    TRAILING_COMMA
        .replace_all(&normalised, "$1")
        .trim()
        .to_string()
}

pub fn aggressive_repair(candidate: &str) -> String {
    let s = CONTROL_CHARS.replace_all(candidate, " ");
    let s = WHITESPACE_RUN.replace_all(&s, " ");
    let s = TRAILING_COMMA.replace_all(&s, "$1");
    let s = SINGLE_QUOTED_KEY.replace_all(&s, r#"${1}"${2}":"#);
    let s = BARE_KEY.replace_all(&s, r#"${1}"${2}":"#);
    let s = SINGLE_QUOTED_VALUE.replace_all(&s, r#":"${1}""#);
    s.trim().to_string()
}

fn parse_structural(s: &str) -> Option<Value> {
    serde_json::from_str::<Value>(s)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn parse_direct(text: &str) -> Option<Value> {
    parse_structural(&isolate_candidate(text))
}

fn parse_repaired(text: &str) -> Option<Value> {
    parse_structural(&conservative_repair(&isolate_candidate(text)))
}

fn parse_aggressive(text: &str) -> Option<Value> {
    parse_structural(&aggressive_repair(&conservative_repair(&isolate_candidate(text))))
}

// ============================================================================
// Regex fallback
// ============================================================================

fn scraped_count(raw: &str) -> Option<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|n| *n > 0 && *n < MAX_SCRAPED_COUNT)
}

/// Scrapes `"Device": n` pairs from the `summary` block and from known
/// device names anywhere in the text.
pub fn extract_counts_by_pattern(text: &str) -> Option<Value> {
    let mut counts = Map::new();

    if let Some(m) = SUMMARY_KEY.find(text) {
        let rest = &text[m.end()..];
        let region = balanced_span(rest).unwrap_or(rest);
        for c in QUOTED_COUNT.captures_iter(region) {
            if let Some(n) = scraped_count(&c[2]) {
                counts.insert(c[1].trim().to_string(), json!(n));
            }
        }
    }

    for c in KNOWN_DEVICE_COUNT.captures_iter(text) {
        if let Some(n) = scraped_count(&c[2]) {
            counts.insert(c[1].trim().to_string(), json!(n));
        }
    }

    if counts.is_empty() {
        return None;
    }

    Some(json!({
        "devices": [],
        "symbols": [],
        "summary": { "EXTRACTED": Value::Object(counts) },
        "notes": FALLBACK_MARKER
    }))
}
