use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const FENCE: &str = "```";

/// Ids recovered from a delegate reply. `ok == false` means the reply had no
/// usable list at all, which is different from a well-formed empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedIds {
    pub ids: Vec<String>,
    pub ok: bool,
}

impl ParsedIds {
    fn failed() -> Self {
        Self::default()
    }
}

/// Extracts a list of test-case ids from free-form delegate text.
///
/// Tolerates code fences (with or without a language tag), prose around the
/// list and single-quoted strings. Ids missing from `valid_ids` are dropped,
/// repeats collapse onto their first occurrence and the delegate's order is
/// otherwise kept. Never panics; a reply that holds no list of strings comes
/// back as `ok == false` with no ids.
pub fn parse(raw: &str, valid_ids: &HashSet<String>) -> ParsedIds {
    let body = strip_fences(raw);
    let Some(list) = parse_list(body) else {
        return ParsedIds::failed();
    };

    let mut seen = HashSet::new();
    let ids = list
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| valid_ids.contains(id))
        .filter(|id| seen.insert(id.clone()))
        .collect();

    ParsedIds { ids, ok: true }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find(FENCE) else {
        return trimmed;
    };

    let after = &trimmed[start + FENCE.len()..];
    let body = match after.find(FENCE) {
        Some(end) => &after[..end],
        None => after,
    };
    strip_language_tag(body).trim()
}

/// Drops a `python` / `json` style tag glued to an opening fence.
fn strip_language_tag(body: &str) -> &str {
    let tag_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
        .unwrap_or(body.len());
    let rest = &body[tag_len..];
    if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '[') {
        rest
    } else {
        body
    }
}

fn parse_list(body: &str) -> Option<Vec<String>> {
    let normalized = body.replace('\'', "\"");

    // a complete JSON document that is not a list of strings is a wrong
    // answer, not noise to dig through
    if let Ok(value) = serde_json::from_str::<Value>(&normalized) {
        return serde_json::from_value::<Vec<String>>(value).ok();
    }

    let spans = std::iter::once(widest_span().find(&normalized))
        .flatten()
        .chain(flat_span().find_iter(&normalized));

    for span in spans {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(span.as_str()) {
            return Some(list);
        }
    }
    None
}

fn widest_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[.*\]").unwrap())
}

fn flat_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\[\]]*\]").unwrap())
}
