//! Data models for the stream scraper
//!
//! This module contains the entities that flow through the resolution
//! pipeline, from the parsed media reference to the final stream list and
//! its diagnostics block.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::{AppError, FailureReason};

/// Which external catalogue an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    /// IMDb `tt` identifiers
    Imdb,
    /// TMDb numeric identifiers, written as `tmdb:<id>`
    Tmdb,
}

/// The item a request asks streams for
///
/// Parsed once from `<externalId>[:<season>:<episode>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub external_id: String,
    pub id_kind: IdKind,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl MediaReference {
    /// Parse an identifier string
    ///
    /// Accepts `tt0000001`, `tt0000001:1:2`, `tmdb:1399` and `tmdb:1399:1:2`.
    /// A season/episode pair that is missing or not numeric leaves both
    /// unset, which marks the reference as a movie.
    pub fn parse(identifier: &str) -> Result<Self, AppError> {
        let identifier = identifier.trim();
        let mut parts: Vec<&str> = identifier.split(':').collect();

        let id_kind = if parts.first().is_some_and(|p| p.eq_ignore_ascii_case("tmdb")) {
            parts.remove(0);
            IdKind::Tmdb
        } else {
            IdKind::Imdb
        };

        let external_id = parts.first().map(|p| p.trim()).unwrap_or_default();
        if external_id.is_empty() {
            return Err(AppError::invalid_identifier(identifier));
        }

        let (season, episode) = match (parts.get(1), parts.get(2)) {
            (Some(s), Some(e)) => match (s.trim().parse::<u32>(), e.trim().parse::<u32>()) {
                (Ok(s), Ok(e)) => (Some(s), Some(e)),
                _ => (None, None),
            },
            _ => (None, None),
        };

        Ok(Self {
            external_id: external_id.to_string(),
            id_kind,
            season,
            episode,
        })
    }

    /// True when no season/episode pair was supplied
    pub fn is_movie(&self) -> bool {
        self.season.is_none() || self.episode.is_none()
    }
}

/// Title and release year of the requested item
///
/// A year of 0 means unknown and relaxes every later year check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub title: String,
    pub year: u16,
}

/// Matching phase a candidate was accepted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Exact,
    Strict,
    Fallback,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPhase::Exact => write!(f, "exact"),
            MatchPhase::Strict => write!(f, "strict"),
            MatchPhase::Fallback => write!(f, "fallback"),
        }
    }
}

/// Why a candidate was not selected
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Generic title mismatch, optionally near a one-word substitution
    TitleMismatch { replacement_distance: Option<usize> },
    /// Single-token reference whose only token matched with a low sequence ratio
    SingleTokenLowSeq {
        sequence_ratio: f64,
        replacement_distance: Option<usize>,
    },
    /// One-word substitution whose differing tokens are too far apart
    ReplacementDistance(usize),
    /// Listed year too far from the target year
    YearDrift(u32),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TitleMismatch {
                replacement_distance,
            } => {
                write!(f, "title_mismatch")?;
                if let Some(d) = replacement_distance {
                    write!(f, "_replacement_dist({d})")?;
                }
                Ok(())
            }
            RejectReason::SingleTokenLowSeq {
                sequence_ratio,
                replacement_distance,
            } => {
                write!(f, "single_token_low_seq({sequence_ratio:.2})")?;
                if let Some(d) = replacement_distance {
                    write!(f, "_replacement_dist({d})")?;
                }
                Ok(())
            }
            RejectReason::ReplacementDistance(d) => write!(f, "replacement_distance({d})"),
            RejectReason::YearDrift(d) => write!(f, "year_drift({d})"),
        }
    }
}

impl Serialize for RejectReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of matching one search result against the reference title
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Exact,
    Strict,
    Fallback,
    Rejected(RejectReason),
}

impl Classification {
    /// Phase of an accepted candidate, `None` when rejected
    pub fn phase(&self) -> Option<MatchPhase> {
        match self {
            Classification::Exact => Some(MatchPhase::Exact),
            Classification::Strict => Some(MatchPhase::Strict),
            Classification::Fallback => Some(MatchPhase::Fallback),
            Classification::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Classification::Rejected(_))
    }
}

/// One site search result, scored and classified
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub post_id: u64,
    pub raw_title: String,
    pub normalized_title: String,
    pub tokens: BTreeSet<String>,
    pub raw_body: String,
    pub overlap: BTreeSet<String>,
    pub token_ratio: f64,
    pub sequence_ratio: f64,
    /// Year listed on the post, if any
    pub year: Option<u16>,
    pub strict_ok: bool,
    pub fallback_ok: bool,
    pub classification: Classification,
}

impl SearchCandidate {
    /// Absolute distance between the listed year and `target`, `None` when
    /// either year is unknown
    pub fn year_drift(&self, target: u16) -> Option<u32> {
        match self.year {
            Some(year) if target != 0 => Some((i32::from(year) - i32::from(target)).unsigned_abs()),
            _ => None,
        }
    }
}

/// Language hint carried by the section an episode row sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LanguageHint {
    #[serde(rename = "ITA")]
    Ita,
    #[serde(rename = "SUB")]
    Sub,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Markup describing one episode inside a matched post
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeFragment {
    /// Post the fragment was cut from
    pub post_id: u64,
    pub raw_html: String,
    pub language_hint: LanguageHint,
}

/// Hosting providers with a dedicated extraction grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HostType {
    /// Form-post provider (landing page, human wait, POST, media URL)
    Deltabit,
    /// URL-rewrite provider
    Mixdrop,
}

impl HostType {
    /// Recognize a provider from an anchor's visible text
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("deltabit") {
            Some(HostType::Deltabit)
        } else if label.contains("mixdrop") {
            Some(HostType::Mixdrop)
        } else {
            None
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Deltabit => write!(f, "Deltabit"),
            HostType::Mixdrop => write!(f, "Mixdrop"),
        }
    }
}

/// A provider link found in an episode fragment
///
/// Links are unique per request by their raw `url`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostLink {
    pub url: String,
    pub display_name: String,
    pub host_type: HostType,
}

/// Final language tag of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Language {
    #[serde(rename = "ITA")]
    Ita,
    #[serde(rename = "SUB")]
    Sub,
}

/// A playable stream, as printed on stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStream {
    pub url: String,
    pub title: Option<String>,
    pub player: HostType,
    pub lang: Language,
    pub match_pct: Option<u8>,
}

/// Which year pass produced the streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YearPass {
    /// Listed year equals the target, or one of them is unknown
    Primary,
    /// Listed year one off the target
    SecondaryYearTolerant,
}

/// Search strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Ranked exact/strict/fallback matching with year passes
    #[default]
    Advanced,
    /// Every result in search order, strict year check, single pattern
    Legacy,
}

/// Per-candidate scores reported in diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateReport {
    pub post_id: u64,
    pub title: String,
    pub tokens: Vec<String>,
    pub overlap: Vec<String>,
    pub ratio_token: f64,
    pub ratio_seq: f64,
    pub strict_ok: bool,
    pub fallback_ok: bool,
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<MatchPhase>,
}

impl CandidateReport {
    pub fn from_candidate(candidate: &SearchCandidate) -> Self {
        Self {
            post_id: candidate.post_id,
            title: candidate.raw_title.clone(),
            tokens: candidate.tokens.iter().cloned().collect(),
            overlap: candidate.overlap.iter().cloned().collect(),
            ratio_token: round2(candidate.token_ratio),
            ratio_seq: round2(candidate.sequence_ratio),
            strict_ok: candidate.strict_ok,
            fallback_ok: candidate.fallback_ok,
            year: candidate.year,
            phase: candidate.classification.phase(),
        }
    }
}

/// A candidate excluded from link resolution, with the reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedReport {
    pub post_id: u64,
    pub title: String,
    pub reason: RejectReason,
    pub overlap: Vec<String>,
    pub ratio_token: f64,
    pub ratio_seq: f64,
}

impl RejectedReport {
    pub fn new(candidate: &SearchCandidate, reason: RejectReason) -> Self {
        Self {
            post_id: candidate.post_id,
            title: candidate.raw_title.clone(),
            reason,
            overlap: candidate.overlap.iter().cloned().collect(),
            ratio_token: round2(candidate.token_ratio),
            ratio_seq: round2(candidate.sequence_ratio),
        }
    }
}

/// A host link that could not be turned into a stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkFailure {
    pub url: String,
    pub player: HostType,
    pub reason: FailureReason,
    pub detail: String,
}

/// Arguments echoed back in diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestArgs {
    pub id: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub relay: bool,
}

/// Structured diagnostics printed next to the streams
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Why no streams were produced; `None` on success
    pub reason: Option<FailureReason>,
    pub title: Option<String>,
    pub year: Option<u16>,
    pub search_mode: SearchMode,
    pub reference_tokens: Vec<String>,
    pub phase: Option<MatchPhase>,
    pub year_pass: Option<YearPass>,
    pub candidates: Vec<CandidateReport>,
    pub matched: Vec<CandidateReport>,
    pub rejected: Vec<RejectedReport>,
    pub links_failed: Vec<LinkFailure>,
    pub metadata_unresolved: bool,
    pub ocr_available: bool,
    pub streams_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<RequestArgs>,
    pub generated_at: String,
}

/// The single JSON object written to stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamResponse {
    pub streams: Vec<ResolvedStream>,
    pub diag: Diagnostics,
}

impl StreamResponse {
    /// Empty result carrying a failure reason
    pub fn failed(reason: FailureReason, mut diag: Diagnostics) -> Self {
        diag.reason = Some(reason);
        diag.streams_count = 0;
        Self {
            streams: Vec::new(),
            diag,
        }
    }
}

/// Error object written to stdout when the pipeline itself broke
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub streams: Vec<ResolvedStream>,
    pub diag: Diagnostics,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            error: error.into(),
            streams: Vec::new(),
            diag: Diagnostics {
                reason: Some(reason),
                generated_at: chrono::Utc::now().to_rfc3339(),
                ..Diagnostics::default()
            },
        }
    }
}

/// Round a ratio to two decimals for reporting
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
