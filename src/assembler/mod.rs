//! Final stream list assembly
//!
//! Deduplicates resolved links by final URL, tags each stream's language and
//! attaches the match confidence of the candidate the links came from.

use std::collections::HashSet;

use crate::hosts::ExtractedMedia;
use crate::models::{
    Diagnostics, HostLink, Language, LanguageHint, MatchPhase, ResolvedStream, StreamResponse,
};
use crate::parser::has_sub_token;

/// A provider link that produced a media URL
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub link: HostLink,
    /// Hint of the section the link's episode row sits in
    pub hint: LanguageHint,
    pub media: ExtractedMedia,
}

/// `SUB` when the section heading says so or the link label carries a
/// standalone "sub" word, `ITA` otherwise
pub fn language_for(display_name: &str, hint: LanguageHint) -> Language {
    if hint == LanguageHint::Sub || has_sub_token(display_name) {
        Language::Sub
    } else {
        Language::Ita
    }
}

/// Confidence shown next to streams of a fuzzy match
///
/// Exact matches need none; neither does unranked (legacy) search.
pub fn match_pct(phase: Option<MatchPhase>, sequence_ratio: f64) -> Option<u8> {
    match phase {
        Some(MatchPhase::Strict) | Some(MatchPhase::Fallback) => {
            Some((sequence_ratio * 100.0).round().clamp(0.0, 100.0) as u8)
        }
        Some(MatchPhase::Exact) | None => None,
    }
}

/// Build the stream list; the first occurrence of a URL wins
pub fn assemble(links: Vec<ResolvedLink>, match_pct: Option<u8>) -> Vec<ResolvedStream> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|resolved| !resolved.media.url.is_empty())
        .filter(|resolved| seen.insert(resolved.media.url.clone()))
        .map(|resolved| {
            let lang = language_for(&resolved.link.display_name, resolved.hint);
            let title = resolved
                .media
                .file_name
                .clone()
                .or_else(|| Some(resolved.link.display_name.clone()))
                .filter(|t| !t.trim().is_empty());
            ResolvedStream {
                url: resolved.media.url,
                title,
                player: resolved.link.host_type,
                lang,
                match_pct,
            }
        })
        .collect()
}

/// Wrap streams and diagnostics into the printed response
pub fn finish(streams: Vec<ResolvedStream>, mut diag: Diagnostics) -> StreamResponse {
    diag.streams_count = streams.len();
    if !streams.is_empty() {
        diag.reason = None;
    }
    StreamResponse { streams, diag }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::models::HostType;
    use proptest::prelude::*;

    fn hint_strategy() -> impl Strategy<Value = LanguageHint> {
        prop_oneof![
            Just(LanguageHint::Ita),
            Just(LanguageHint::Sub),
            Just(LanguageHint::Unknown)
        ]
    }

    proptest! {
        #[test]
        fn prop_urls_are_unique(
            entries in proptest::collection::vec(("[a-c]{1,2}", "[A-Za-z ]{0,12}", hint_strategy()), 0..20)
        ) {
            let links: Vec<ResolvedLink> = entries
                .iter()
                .map(|(url, name, hint)| ResolvedLink {
                    link: HostLink {
                        url: format!("https://clicka.test/{url}"),
                        display_name: name.clone(),
                        host_type: HostType::Mixdrop,
                    },
                    hint: *hint,
                    media: ExtractedMedia { url: format!("https://cdn.test/{url}"), file_name: None },
                })
                .collect();
            let streams = assemble(links, None);
            let unique: HashSet<_> = streams.iter().map(|s| s.url.clone()).collect();
            prop_assert_eq!(unique.len(), streams.len());
        }

        #[test]
        fn prop_sub_iff_token(name in "[A-Za-z]{0,8}( (sub|Sub|SUB|subito|ita))?", hint in hint_strategy()) {
            let lang = language_for(&name, hint);
            let expected = hint == LanguageHint::Sub
                || name.split(' ').any(|w| w.eq_ignore_ascii_case("sub"));
            prop_assert_eq!(lang == Language::Sub, expected);
        }
    }
}
