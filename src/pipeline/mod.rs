//! Request orchestration
//!
//! One request runs metadata -> search -> episode lookup -> link resolution
//! -> assembly. Candidates are tried in two year passes; the first candidate
//! whose episode row yields at least one working link ends the search.
//! Failures of one candidate, fragment or link only move the pipeline on to
//! the next alternative.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::assembler::{self, ResolvedLink};
use crate::config::Config;
use crate::error::{AppError, AppResult, FailureReason};
use crate::gate::cookies::GateCookieCache;
use crate::gate::ocr::{DigitRecognizer, TesseractOcr};
use crate::gate::RedirectResolver;
use crate::hosts::HostExtractor;
use crate::metadata::{self, MetadataResolver, MetadataSource};
use crate::models::{
    Diagnostics, HostLink, LanguageHint, LinkFailure, MediaReference, RejectReason, RejectedReport,
    SearchCandidate, SearchMode, StreamResponse, YearPass,
};
use crate::parser;
use crate::scraper::{HttpFetch, Scraper, ScraperConfig};
use crate::search::{SearchMatcher, SearchOutcome};

/// Whether a candidate's listed year is admitted by a pass
fn admitted(candidate: &SearchCandidate, target_year: u16, pass: YearPass) -> bool {
    match (pass, candidate.year_drift(target_year)) {
        (YearPass::Primary, None | Some(0)) => true,
        (YearPass::SecondaryYearTolerant, Some(1)) => true,
        _ => false,
    }
}

/// Year passes run for a search mode
fn year_passes(mode: SearchMode) -> &'static [YearPass] {
    match mode {
        SearchMode::Advanced => &[YearPass::Primary, YearPass::SecondaryYearTolerant],
        SearchMode::Legacy => &[YearPass::Primary],
    }
}

/// Outcome of trying one candidate's episode rows
enum Attempt {
    /// No episode row with a link
    NoRows,
    /// Rows found, every link failed
    LinksFailed(Vec<LinkFailure>),
    Resolved(Vec<ResolvedLink>, Vec<LinkFailure>),
}

/// The whole resolution pipeline
pub struct Pipeline {
    config: Arc<Config>,
    metadata: MetadataResolver,
    search: SearchMatcher,
    hosts: HostExtractor,
    ocr: Arc<dyn DigitRecognizer>,
}

impl Pipeline {
    /// Wire the pipeline on top of a transport and an OCR engine
    pub fn new(http: Arc<dyn HttpFetch>, ocr: Arc<dyn DigitRecognizer>, config: Config) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(GateCookieCache::new(config.cookie_dir.clone()));
        let resolver = Arc::new(RedirectResolver::new(cache, ocr.clone(), config.clone()));

        Self {
            metadata: MetadataResolver::new(http.clone(), config.clone()),
            search: SearchMatcher::new(http.clone(), config.clone()),
            hosts: HostExtractor::new(http, resolver, config.clone()),
            ocr,
            config,
        }
    }

    /// Pipeline with the reqwest transport and the tesseract OCR engine
    pub fn from_config(config: Config) -> AppResult<Self> {
        let scraper = Scraper::with_config(ScraperConfig::from(&config))?;
        let ocr = TesseractOcr::new(config.ocr_binary.clone());
        Ok(Self::new(Arc::new(scraper), Arc::new(ocr), config))
    }

    /// Resolve streams for `<externalId>[:<season>:<episode>]`
    pub async fn run(&self, identifier: &str) -> StreamResponse {
        let mut diag = Diagnostics {
            search_mode: self.config.search_mode,
            generated_at: chrono::Utc::now().to_rfc3339(),
            ..Diagnostics::default()
        };

        let reference = match MediaReference::parse(identifier) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(identifier, error = %e, "unparseable identifier");
                return StreamResponse::failed(e.reason(), diag);
            }
        };
        let (Some(season), Some(episode)) = (reference.season, reference.episode) else {
            info!(identifier, "movies are not supported");
            return StreamResponse::failed(FailureReason::IsMovie, diag);
        };

        let (resolved, source) = self.metadata.resolve(&reference).await;
        diag.metadata_unresolved = source == MetadataSource::RawId;
        let title = metadata::clean_title(&resolved.title);
        diag.title = Some(title.clone());
        diag.year = Some(resolved.year);
        info!(title = %title, year = resolved.year, season, episode, "resolving");

        let outcome = match self.search.search(&title).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "search failed");
                return StreamResponse::failed(e.reason(), diag);
            }
        };
        diag.reference_tokens = outcome.reference.tokens.clone();
        diag.phase = outcome.phase;
        diag.candidates = outcome.candidate_reports();
        diag.matched = outcome.matched_reports();
        diag.rejected = outcome.rejected_reports();

        let mut response = self
            .resolve_episode(&outcome, resolved.year, season, episode, diag)
            .await;
        response.diag.ocr_available = self.ocr.is_available().await;
        response
    }

    async fn resolve_episode(
        &self,
        outcome: &SearchOutcome,
        target_year: u16,
        season: u32,
        episode: u32,
        mut diag: Diagnostics,
    ) -> StreamResponse {
        let selected = outcome.selected();
        if selected.is_empty() {
            let reason = match self.config.search_mode {
                SearchMode::Advanced => FailureReason::NoTitleMatch,
                SearchMode::Legacy => FailureReason::NoEpisodeMatch,
            };
            return StreamResponse::failed(reason, diag);
        }

        let passes = year_passes(self.config.search_mode);
        let mut links_attempted = false;

        for &pass in passes {
            for candidate in selected.iter().filter(|c| admitted(c, target_year, pass)) {
                debug!(post_id = candidate.post_id, ?pass, "trying candidate");
                match self.try_candidate(candidate, season, episode).await {
                    Attempt::NoRows => continue,
                    Attempt::LinksFailed(failures) => {
                        links_attempted = true;
                        diag.links_failed.extend(failures);
                    }
                    Attempt::Resolved(links, failures) => {
                        diag.links_failed.extend(failures);
                        diag.year_pass = Some(pass);
                        record_year_drift(&mut diag, &selected, target_year, passes);
                        let pct = assembler::match_pct(outcome.phase, candidate.sequence_ratio);
                        let streams = assembler::assemble(links, pct);
                        info!(post_id = candidate.post_id, streams = streams.len(), "streams resolved");
                        return assembler::finish(streams, diag);
                    }
                }
            }
        }

        record_year_drift(&mut diag, &selected, target_year, passes);
        let reason = if !links_attempted {
            FailureReason::NoEpisodeMatch
        } else if diag
            .links_failed
            .iter()
            .all(|f| f.reason == FailureReason::GateChallengeFailed)
        {
            FailureReason::GateChallengeFailed
        } else {
            FailureReason::HostExtractionFailed
        };
        StreamResponse::failed(reason, diag)
    }

    /// Locate the episode in one candidate and resolve all of its links
    async fn try_candidate(&self, candidate: &SearchCandidate, season: u32, episode: u32) -> Attempt {
        let fragments = parser::locate_episode(
            candidate.post_id,
            &candidate.raw_body,
            season,
            episode,
            self.config.search_mode,
        );

        let mut seen = HashSet::new();
        let links: Vec<(HostLink, LanguageHint)> = fragments
            .iter()
            .flat_map(|fragment| {
                parser::extract_host_links(&fragment.raw_html)
                    .into_iter()
                    .map(move |link| (link, fragment.language_hint))
            })
            .filter(|(link, _)| seen.insert(link.url.clone()))
            .collect();

        if links.is_empty() {
            debug!(post_id = candidate.post_id, fragments = fragments.len(), "no usable episode row");
            return Attempt::NoRows;
        }
        info!(post_id = candidate.post_id, links = links.len(), "resolving host links");

        let results = join_all(links.iter().map(|(link, _)| self.hosts.extract(link))).await;

        let mut resolved = Vec::new();
        let mut failures = Vec::new();
        for ((link, hint), result) in links.into_iter().zip(results) {
            match result {
                Ok(media) => resolved.push(ResolvedLink { link, hint, media }),
                Err(e) => {
                    warn!(url = %link.url, player = %link.host_type, error = %e, "link failed");
                    let error = AppError::from(e);
                    failures.push(LinkFailure {
                        url: link.url,
                        player: link.host_type,
                        reason: error.reason(),
                        detail: error.to_string(),
                    });
                }
            }
        }

        if resolved.is_empty() {
            Attempt::LinksFailed(failures)
        } else {
            Attempt::Resolved(resolved, failures)
        }
    }
}

/// Report title-matched candidates that no year pass admits
fn record_year_drift(
    diag: &mut Diagnostics,
    selected: &[&SearchCandidate],
    target_year: u16,
    passes: &[YearPass],
) {
    for candidate in selected {
        if passes.iter().any(|&pass| admitted(candidate, target_year, pass)) {
            continue;
        }
        if let Some(drift) = candidate.year_drift(target_year) {
            diag.rejected
                .push(RejectedReport::new(candidate, RejectReason::YearDrift(drift)));
        }
    }
}
