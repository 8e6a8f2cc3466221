//! Site search and candidate classification
//!
//! Queries the site's search endpoint, fetches every candidate post once,
//! scores it against the reference title and classifies the whole set in
//! phase order: exact, else strict, else fallback. Everything that was not
//! selected carries a rejection reason for the diagnostics block.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{endpoints, markers};
use crate::error::FailureReason;
use crate::metadata::search_query;
use crate::models::{
    CandidateReport, Classification, MatchPhase, RejectReason, RejectedReport, SearchCandidate,
    SearchMode,
};
use crate::parser;
use crate::scraper::{FetchRequest, HttpFetch, ScraperError};
use crate::text::similarity;
use crate::text::{self, TitleProfile};

/// Request-level search failures
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    RequestFailed(#[from] ScraperError),

    #[error("search response could not be decoded: {0}")]
    Decode(String),

    #[error("search returned no results")]
    NoResults,
}

impl SearchError {
    pub fn reason(&self) -> FailureReason {
        match self {
            SearchError::RequestFailed(_) | SearchError::Decode(_) => {
                FailureReason::SearchRequestFailed
            }
            SearchError::NoResults => FailureReason::NoSearchResults,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct PostEntry {
    #[serde(default)]
    title: Rendered,
    #[serde(default)]
    content: Rendered,
}

/// Result of one search: every candidate, classified
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub reference: TitleProfile,
    /// Phase that selected candidates; `None` when nothing matched or in
    /// legacy mode
    pub phase: Option<MatchPhase>,
    /// All fetched candidates, in search order
    pub candidates: Vec<SearchCandidate>,
}

impl SearchOutcome {
    /// Candidates eligible for episode lookup, in search order
    pub fn selected(&self) -> Vec<&SearchCandidate> {
        self.candidates
            .iter()
            .filter(|c| !c.classification.is_rejected())
            .collect()
    }

    pub fn candidate_reports(&self) -> Vec<CandidateReport> {
        self.candidates.iter().map(CandidateReport::from_candidate).collect()
    }

    pub fn matched_reports(&self) -> Vec<CandidateReport> {
        self.selected()
            .into_iter()
            .map(CandidateReport::from_candidate)
            .collect()
    }

    pub fn rejected_reports(&self) -> Vec<RejectedReport> {
        self.candidates
            .iter()
            .filter_map(|c| match &c.classification {
                Classification::Rejected(reason) => Some(RejectedReport::new(c, reason.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Score a post title against the reference
///
/// Parenthetical qualifiers are removed from the title before tokenizing.
pub fn build_candidate(
    reference: &TitleProfile,
    post_id: u64,
    raw_title: &str,
    raw_body: String,
    year: Option<u16>,
) -> SearchCandidate {
    let profile = TitleProfile::new(&text::strip_parentheticals(raw_title));
    let scores = similarity::score(reference, &profile);
    let strict_ok = similarity::strict_match(reference, &profile);
    let fallback_ok = similarity::fallback_match(reference, &profile, raw_title, &scores);

    SearchCandidate {
        post_id,
        raw_title: raw_title.to_string(),
        normalized_title: profile.normalized,
        tokens: profile.token_set,
        raw_body,
        overlap: scores.overlap,
        token_ratio: scores.token_ratio,
        sequence_ratio: scores.sequence_ratio,
        year,
        strict_ok,
        fallback_ok,
        classification: Classification::Rejected(RejectReason::TitleMismatch {
            replacement_distance: None,
        }),
    }
}

fn candidate_profile(candidate: &SearchCandidate) -> TitleProfile {
    TitleProfile {
        raw: candidate.raw_title.clone(),
        normalized: candidate.normalized_title.clone(),
        tokens: candidate.tokens.iter().cloned().collect(),
        token_set: candidate.tokens.clone(),
    }
}

/// Reason recorded for a candidate the chosen phase did not select
fn rejection_reason(reference: &TitleProfile, candidate: &SearchCandidate) -> RejectReason {
    let replacement_distance =
        similarity::replacement_distance(reference, &candidate_profile(candidate));
    if reference.token_set.len() == 1 && candidate.overlap.len() == 1 {
        RejectReason::SingleTokenLowSeq {
            sequence_ratio: candidate.sequence_ratio,
            replacement_distance,
        }
    } else {
        RejectReason::TitleMismatch {
            replacement_distance,
        }
    }
}

/// Classify every candidate and return the phase that selected them
///
/// Exact matches pre-empt strict ones, which pre-empt fallback ones. In the
/// fallback phase a one-word substitution is only accepted when the two
/// differing words are at most one edit apart.
pub fn classify(reference: &TitleProfile, candidates: &mut [SearchCandidate]) -> Option<MatchPhase> {
    let any_exact = candidates
        .iter()
        .any(|c| c.normalized_title == reference.normalized);
    let any_strict = candidates.iter().any(|c| c.strict_ok);

    let phase = if any_exact {
        MatchPhase::Exact
    } else if any_strict {
        MatchPhase::Strict
    } else {
        MatchPhase::Fallback
    };

    for candidate in candidates.iter_mut() {
        let classification = match phase {
            MatchPhase::Exact if candidate.normalized_title == reference.normalized => {
                Classification::Exact
            }
            MatchPhase::Strict if candidate.strict_ok => Classification::Strict,
            MatchPhase::Fallback if candidate.fallback_ok => {
                match similarity::replacement_distance(reference, &candidate_profile(candidate)) {
                    Some(distance) if distance > similarity::MAX_REPLACEMENT_DISTANCE => {
                        Classification::Rejected(RejectReason::ReplacementDistance(distance))
                    }
                    _ => Classification::Fallback,
                }
            }
            _ => Classification::Rejected(rejection_reason(reference, candidate)),
        };
        candidate.classification = classification;
    }

    candidates
        .iter()
        .any(|c| !c.classification.is_rejected())
        .then_some(phase)
}

/// Queries the content site and classifies its results
pub struct SearchMatcher {
    http: Arc<dyn HttpFetch>,
    config: Arc<Config>,
}

impl SearchMatcher {
    pub fn new(http: Arc<dyn HttpFetch>, config: Arc<Config>) -> Self {
        Self { http, config }
    }

    /// Search the site for `title` and classify every result
    ///
    /// # Arguments
    /// * `title` - Cleaned reference title (see [`crate::metadata::clean_title`])
    ///
    /// # Returns
    /// Every fetched candidate with its classification, or a request-level
    /// error when the search itself failed or returned nothing
    pub async fn search(&self, title: &str) -> Result<SearchOutcome, SearchError> {
        let reference = TitleProfile::new(title);
        let ids = self.search_ids(title).await?;
        info!(query = title, results = ids.len(), "site search");

        let mut candidates = Vec::with_capacity(ids.len());
        for post_id in ids {
            match self.fetch_candidate(&reference, post_id).await {
                Some(candidate) => {
                    debug!(
                        post_id,
                        title = %candidate.normalized_title,
                        token_ratio = candidate.token_ratio,
                        sequence_ratio = candidate.sequence_ratio,
                        year = ?candidate.year,
                        "candidate scored"
                    );
                    candidates.push(candidate);
                }
                None => continue,
            }
        }

        let phase = match self.config.search_mode {
            SearchMode::Advanced => classify(&reference, &mut candidates),
            SearchMode::Legacy => {
                for candidate in candidates.iter_mut() {
                    candidate.classification = Classification::Fallback;
                }
                None
            }
        };
        debug!(?phase, "classification done");

        Ok(SearchOutcome {
            reference,
            phase,
            candidates,
        })
    }

    async fn search_ids(&self, title: &str) -> Result<Vec<u64>, SearchError> {
        let url = endpoints::search(&self.config.site_base_url, &search_query(title));
        let response = self
            .http
            .fetch(FetchRequest::get(url).header("Accept", "application/json"))
            .await?
            .ensure_success()?;
        let hits: Vec<SearchHit> =
            serde_json::from_str(&response.body).map_err(|e| SearchError::Decode(e.to_string()))?;
        if hits.is_empty() {
            return Err(SearchError::NoResults);
        }
        Ok(hits.into_iter().map(|hit| hit.id).collect())
    }

    /// Fetch and score one post; failures skip the post
    async fn fetch_candidate(&self, reference: &TitleProfile, post_id: u64) -> Option<SearchCandidate> {
        let url = endpoints::post(&self.config.site_base_url, post_id);
        let response = match self
            .http
            .fetch(FetchRequest::get(url).header("Accept", "application/json"))
            .await
            .and_then(|r| r.ensure_success())
        {
            Ok(response) => response,
            Err(e) => {
                warn!(post_id, error = %e, "post fetch failed, skipping");
                return None;
            }
        };
        if response.body.contains(markers::INVALID_POST) {
            debug!(post_id, "invalid post id, skipping");
            return None;
        }
        let post: PostEntry = match serde_json::from_str(&response.body) {
            Ok(post) => post,
            Err(e) => {
                warn!(post_id, error = %e, "post could not be decoded, skipping");
                return None;
            }
        };

        let year = self.post_year(&post.content.rendered).await;
        Some(build_candidate(
            reference,
            post_id,
            &post.title.rendered,
            post.content.rendered,
            year,
        ))
    }

    /// Year listed in a post, looking at the full article when the excerpt
    /// has none
    async fn post_year(&self, body: &str) -> Option<u16> {
        if let Some(year) = parser::extract_year(body) {
            return Some(year);
        }
        let link = parser::read_more_link(body)?;
        match self.http.fetch(FetchRequest::get(link.as_str())).await {
            Ok(response) => parser::extract_year(&response.body),
            Err(e) => {
                debug!(url = %link, error = %e, "read-more fetch failed");
                None
            }
        }
    }
}
