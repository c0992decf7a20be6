//! # Identifier Normalizer
//!
//! Turns a raw catalog name into a canonical, filesystem-safe identifier.
//! Normalization is a pure function of its inputs and never fails; a name that
//! is empty after stripping yields an empty id, which callers reject.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::catalog::{CanonicalId, StatusPartition};

/// Parenthesized scope note starting with the token "in"
static IN_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(\s*in\s[^)]*\)").expect("static pattern"));

/// Parenthesized "previously ..." clause, payload captured
static PREVIOUSLY_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(\s*previously\b([^)]*)\)").expect("static pattern"));

const QUOTE_VARIANTS: [char; 6] = ['\u{2018}', '\u{2019}', '\u{201B}', '\u{02BC}', '\u{00B4}', '`'];

const STOP_WORDS: [&str; 7] = ["a", "the", "of", "and", "in", "on", "for"];

/// Characters rejected by common filesystems
const FORBIDDEN_CHARS: [char; 7] = ['\\', '?', '*', '<', '>', '|', '"'];

/// Intermediate result before collision handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedName {
    pub base: String,
    pub previously: Option<String>,
}

/// Derives the canonical id of `raw_name` within `status`.
///
/// A withdrawn name whose id collides with an authorised id is suffixed with
/// the slug of its "previously ..." payload, or with `-0` when there is none.
#[must_use]
pub fn normalize(
    raw_name: &str,
    status: StatusPartition,
    authorised_ids: &HashSet<CanonicalId>,
) -> CanonicalId {
    normalize_unique(raw_name, status, authorised_ids, &HashSet::new())
}

/// Like [`normalize`], but a collision suffix also steers clear of `taken`,
/// the ids already assigned in the withdrawn partition.
#[must_use]
pub fn normalize_unique(
    raw_name: &str,
    status: StatusPartition,
    authorised_ids: &HashSet<CanonicalId>,
    taken: &HashSet<CanonicalId>,
) -> CanonicalId {
    let NormalizedName { base, previously } = normalize_name(raw_name);

    if status != StatusPartition::Withdrawn
        || base.is_empty()
        || !authorised_ids.contains(base.as_str())
    {
        return CanonicalId::new(base);
    }

    let mut id = match previously.as_deref().map(slug).filter(|s| !s.is_empty()) {
        Some(suffix) => format!("{base}-{suffix}"),
        None => {
            warn!(
                "Withdrawn '{}' collides with authorised id '{}' and has no previous name; using '-0' suffix",
                raw_name, base
            );
            format!("{base}-0")
        }
    };
    while authorised_ids.contains(id.as_str()) || taken.contains(id.as_str()) {
        id.push_str("-0");
    }
    CanonicalId::new(id)
}

/// Applies the cleaning steps without collision handling.
#[must_use]
pub fn normalize_name(raw_name: &str) -> NormalizedName {
    let text = strip_quotes(raw_name);
    let text = IN_CLAUSE.replace_all(&text, " ");

    let previously = PREVIOUSLY_CLAUSE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|p| !p.is_empty());
    let text = PREVIOUSLY_CLAUSE.replace_all(&text, " ");

    let text: String = text.chars().filter(|c| !matches!(c, '(' | ')')).collect();
    let text = capitalize(&clean_punctuation(&text));

    let words: Vec<&str> = text
        .split(' ')
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .collect();

    NormalizedName {
        base: words.join("-"),
        previously,
    }
}

/// Lower-cased, dash-joined form of free text.
#[must_use]
pub fn slug(text: &str) -> String {
    let text: String = strip_quotes(text)
        .chars()
        .filter(|c| !matches!(c, '(' | ')'))
        .collect();
    clean_punctuation(&text)
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn strip_quotes(text: &str) -> String {
    text.chars()
        .map(|c| if QUOTE_VARIANTS.contains(&c) { '\'' } else { c })
        .filter(|c| *c != '\'')
        .collect()
}

fn clean_punctuation(text: &str) -> String {
    let replaced: String = text
        .chars()
        .filter(|c| *c != '.' && !FORBIDDEN_CHARS.contains(c))
        .map(|c| if matches!(c, '/' | ',' | ';' | ':') { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First character upper-cased, the rest lower-cased.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
