//! Similarity scoring between a reference title and a candidate title
//!
//! Three measures are combined by the search matcher:
//! - token ratio: share of reference tokens found in the candidate
//! - sequence ratio: Ratcliff/Obershelp similarity of the normalized strings
//! - replacement distance: edit distance between the two differing tokens
//!   when the titles differ by a single substituted word

use std::collections::{BTreeSet, HashMap};

use super::{has_parenthetical, TitleProfile};

/// Single-token reference: sequence ratio accepted on its own
pub const SINGLE_TOKEN_SEQ_RATIO: f64 = 0.85;
/// Single-token reference of at least [`LONG_TOKEN_LEN`] chars
pub const SINGLE_LONG_TOKEN_SEQ_RATIO: f64 = 0.67;
/// Single long token when the candidate title has a parenthetical qualifier
pub const SINGLE_TOKEN_PAREN_SEQ_RATIO: f64 = 0.60;
/// Minimum length of a "long" single token
pub const LONG_TOKEN_LEN: usize = 6;
/// Fallback: first token present, two shared tokens and this sequence ratio
pub const FALLBACK_OVERLAP_SEQ_RATIO: f64 = 0.55;
/// Fallback: first token present and this token ratio
pub const FALLBACK_TOKEN_RATIO: f64 = 0.7;
/// Fallback: first token present and this sequence ratio
pub const FALLBACK_SEQ_RATIO: f64 = 0.85;
/// Largest edit distance tolerated for a single substituted token
pub const MAX_REPLACEMENT_DISTANCE: usize = 1;

/// Sequences at least this long get their most frequent elements ignored
/// as match anchors
const AUTOJUNK_MIN_LEN: usize = 200;

/// Scores of one candidate against the reference title
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityScores {
    /// Tokens shared by reference and candidate
    pub overlap: BTreeSet<String>,
    /// `|overlap| / max(1, |reference tokens|)`
    pub token_ratio: f64,
    /// Whole-string similarity in `[0, 1]`
    pub sequence_ratio: f64,
}

/// Compute all scores of `candidate` against `reference`
pub fn score(reference: &TitleProfile, candidate: &TitleProfile) -> SimilarityScores {
    let overlap: BTreeSet<String> = reference
        .token_set
        .intersection(&candidate.token_set)
        .cloned()
        .collect();
    let token_ratio = if reference.token_set.is_empty() {
        0.0
    } else {
        overlap.len() as f64 / reference.token_set.len().max(1) as f64
    };

    SimilarityScores {
        token_ratio,
        sequence_ratio: sequence_ratio(&reference.normalized, &candidate.normalized),
        overlap,
    }
}

/// Ratcliff/Obershelp similarity: `2 * matched / (len(a) + len(b))`
///
/// Matched characters are found by recursively taking the longest common
/// block and repeating on the unmatched sides. Two empty strings are
/// identical (ratio 1.0).
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let b2j = index_positions(b);
    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, b, &b2j, (alo, ahi), (blo, bhi));
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

fn index_positions(b: &[char]) -> HashMap<char, Vec<usize>> {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, ch) in b.iter().enumerate() {
        b2j.entry(*ch).or_default().push(j);
    }
    if b.len() >= AUTOJUNK_MIN_LEN {
        let popular = b.len() / 100 + 1;
        b2j.retain(|_, positions| positions.len() <= popular);
    }
    b2j
}

fn longest_match(
    a: &[char],
    b: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_len) = (alo, blo, 0);
    let mut run_len: HashMap<usize, usize> = HashMap::new();

    for (i, ch) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next_run_len = HashMap::new();
        if let Some(positions) = b2j.get(ch) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let prev = j
                    .checked_sub(1)
                    .and_then(|p| run_len.get(&p))
                    .copied()
                    .unwrap_or(0);
                let k = prev + 1;
                next_run_len.insert(j, k);
                if k > best_len {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_len = k;
                }
            }
        }
        run_len = next_run_len;
    }

    // Grow the block across elements left out of the index as too common.
    while best_i > alo && best_j > blo && a[best_i - 1] == b[best_j - 1] {
        best_i -= 1;
        best_j -= 1;
        best_len += 1;
    }
    while best_i + best_len < ahi && best_j + best_len < bhi && a[best_i + best_len] == b[best_j + best_len]
    {
        best_len += 1;
    }

    (best_i, best_j, best_len)
}

/// Levenshtein distance between two tokens
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Whether the candidate differs from the reference by one substituted
/// token (same size, all but one token shared)
pub fn is_single_substitution(reference: &TitleProfile, candidate: &TitleProfile) -> bool {
    let n = reference.token_set.len();
    n > 1
        && candidate.token_set.len() == n
        && reference.token_set.intersection(&candidate.token_set).count() == n - 1
}

/// Edit distance between the two differing tokens of a single substitution
///
/// Returns `None` when the titles are not a single substitution apart.
pub fn replacement_distance(reference: &TitleProfile, candidate: &TitleProfile) -> Option<usize> {
    if !is_single_substitution(reference, candidate) {
        return None;
    }
    let removed = reference.token_set.difference(&candidate.token_set).next()?;
    let added = candidate.token_set.difference(&reference.token_set).next()?;
    Some(edit_distance(removed, added))
}

/// Exact phase: normalized strings are identical
pub fn exact_match(reference: &TitleProfile, candidate: &TitleProfile) -> bool {
    reference.normalized == candidate.normalized
}

/// Strict phase, multi-token references only
///
/// Accepts equal token sets, equal normalized strings, or token sets whose
/// symmetric difference is a single token (one extra or one missing word).
/// A same-size set sharing all but one token is a substitution and never
/// strict; substitutions are left to the fallback phase.
pub fn strict_match(reference: &TitleProfile, candidate: &TitleProfile) -> bool {
    if reference.token_set.len() <= 1 {
        return false;
    }
    let accepted = reference.token_set == candidate.token_set
        || reference.normalized == candidate.normalized
        || reference
            .token_set
            .symmetric_difference(&candidate.token_set)
            .count()
            == 1;
    accepted && !is_single_substitution(reference, candidate)
}

/// Fallback phase title check (before the substitution distance gate)
///
/// `candidate_raw_title` is the title as listed by the site, used to detect a
/// parenthetical qualifier.
pub fn fallback_match(
    reference: &TitleProfile,
    candidate: &TitleProfile,
    candidate_raw_title: &str,
    scores: &SimilarityScores,
) -> bool {
    let seq = scores.sequence_ratio;

    if reference.token_set.len() == 1 {
        let Some(token) = reference.first_token() else {
            return false;
        };
        if scores.overlap.len() != 1 {
            return false;
        }
        let long_token = token.len() >= LONG_TOKEN_LEN;
        let paren_relax = long_token && has_parenthetical(candidate_raw_title);
        return seq >= SINGLE_TOKEN_SEQ_RATIO
            || (long_token && seq >= SINGLE_LONG_TOKEN_SEQ_RATIO)
            || (paren_relax && seq >= SINGLE_TOKEN_PAREN_SEQ_RATIO);
    }

    let has_first = reference
        .first_token()
        .is_some_and(|tok| candidate.token_set.contains(tok));
    if !has_first {
        return false;
    }
    (scores.overlap.len() >= 2 && seq >= FALLBACK_OVERLAP_SEQ_RATIO)
        || scores.token_ratio >= FALLBACK_TOKEN_RATIO
        || seq >= FALLBACK_SEQ_RATIO
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Identical normalized titles score 1.0 on both ratios and match exactly
        #[test]
        fn property_identical_titles_score_one(title in "[a-zA-Z]{3,10}( [a-zA-Z]{3,10}){0,4}") {
            let reference = TitleProfile::new(&title);
            let candidate = TitleProfile::new(&title.to_uppercase());
            let scores = score(&reference, &candidate);
            prop_assert_eq!(scores.sequence_ratio, 1.0);
            if !reference.token_set.is_empty() {
                prop_assert_eq!(scores.token_ratio, 1.0);
            }
            prop_assert!(exact_match(&reference, &candidate));
        }

        /// The sequence ratio always lies in [0, 1]
        #[test]
        fn property_sequence_ratio_bounded(a in "[a-z ]{0,30}", b in "[a-z ]{0,30}") {
            let r = sequence_ratio(&a, &b);
            prop_assert!((0.0..=1.0).contains(&r));
        }
    }
}
