//! Title normalization for fuzzy matching
//!
//! Turns free-form titles (HTML entities, accents, punctuation) into a
//! canonical lowercase form and a filtered token list. Everything here is
//! pure and total: empty input yields empty output.

pub mod similarity;

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Words ignored when building token sets (Italian/English articles and
/// generic series vocabulary)
pub const STOPWORDS: &[&str] = &[
    "the", "la", "le", "lo", "gli", "i", "il", "di", "da", "a", "in", "of", "and", "or", "serie",
    "series", "season", "show", "tv", "una", "un", "uno", "del", "della", "degli", "delle", "de",
    "el",
];

static PARENTHETICAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid parenthetical regex"));

/// Decode HTML entities (and drop any inline markup) from a title
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') && !text.contains('<') {
        return text.to_string();
    }
    Html::parse_fragment(text)
        .root_element()
        .text()
        .collect::<String>()
}

/// Normalize a title for comparison
///
/// Decodes HTML entities, strips diacritics (`Mercoledì` -> `mercoledi`),
/// lowercases, and collapses every run of non `[a-z0-9]` characters into a
/// single space.
///
/// # Arguments
/// * `title` - Raw title text, possibly containing entities or markup
///
/// # Returns
/// The normalized string, empty when the title has no alphanumerics
pub fn normalize(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }

    let decoded = decode_entities(title);
    let folded: String = decoded
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

fn is_significant(token: &str) -> bool {
    !STOPWORDS.contains(&token)
        && (token.len() > 2 || token.chars().all(|c| c.is_ascii_digit()))
}

/// Tokenize a title, dropping stopwords and short non-numeric tokens
///
/// Tokens keep their order of first appearance; duplicates are removed.
pub fn tokens(title: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    normalize(title)
        .split(' ')
        .filter(|tok| !tok.is_empty() && is_significant(tok))
        .filter(|tok| seen.insert(tok.to_string()))
        .map(str::to_string)
        .collect()
}

/// Token set of a title
pub fn token_set(title: &str) -> BTreeSet<String> {
    tokens(title).into_iter().collect()
}

/// Replace every `( ... )` group with a space, e.g. `Show (2019)` -> `Show  `
pub fn strip_parentheticals(title: &str) -> String {
    PARENTHETICAL_RE.replace_all(title, " ").into_owned()
}

/// Whether a title carries a parenthetical qualifier such as `(US)`
pub fn has_parenthetical(title: &str) -> bool {
    title.contains('(') && title.contains(')')
}

/// A title pre-processed once for repeated comparisons
#[derive(Debug, Clone, PartialEq)]
pub struct TitleProfile {
    /// Raw title as received
    pub raw: String,
    /// Output of [`normalize`]
    pub normalized: String,
    /// Ordered significant tokens
    pub tokens: Vec<String>,
    /// Same tokens as a set
    pub token_set: BTreeSet<String>,
}

impl TitleProfile {
    /// Build a profile from a raw title
    pub fn new(raw: &str) -> Self {
        let tokens = tokens(raw);
        Self {
            raw: raw.to_string(),
            normalized: normalize(raw),
            token_set: tokens.iter().cloned().collect(),
            tokens,
        }
    }

    /// First significant token, used as the anchor in fallback matching
    pub fn first_token(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert!(tokens("").is_empty());
    }

    #[test]
    fn test_normalize_strips_accents() {
        assert_eq!(normalize("Mercoledì"), "mercoledi");
        assert_eq!(normalize("Élite"), "elite");
    }

    #[test]
    fn test_normalize_decodes_entities() {
        assert_eq!(normalize("Law &amp; Order"), "law order");
        assert_eq!(normalize("Grey&#8217;s Anatomy"), "grey s anatomy");
    }

    #[test]
    fn test_normalize_collapses_punctuation() {
        assert_eq!(normalize("  The  Walking -- Dead!! "), "the walking dead");
    }

    #[test]
    fn test_tokens_filter_stopwords_and_short() {
        assert_eq!(tokens("The Office of the Dead"), vec!["office", "dead"]);
        assert_eq!(tokens("La casa di carta"), vec!["casa", "carta"]);
    }

    #[test]
    fn test_tokens_keep_short_numbers() {
        assert_eq!(tokens("9-1-1 Lone Star"), vec!["9", "1", "lone", "star"]);
    }

    #[test]
    fn test_tokens_dedup_preserves_order() {
        assert_eq!(tokens("Dead Dead Living"), vec!["dead", "living"]);
    }

    #[test]
    fn test_strip_parentheticals() {
        assert_eq!(normalize(&strip_parentheticals("Doctor Who (2005)")), "doctor who");
        assert_eq!(normalize(&strip_parentheticals("Skins (US) extra")), "skins extra");
        assert_eq!(normalize(&strip_parentheticals("Show (Part")), "show part");
    }

    #[test]
    fn test_title_profile_first_token() {
        let profile = TitleProfile::new("The Good Doctor");
        assert_eq!(profile.first_token(), Some("good"));
        assert_eq!(profile.normalized, "the good doctor");
    }
}
