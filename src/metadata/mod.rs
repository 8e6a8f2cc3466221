//! Metadata resolution: external id -> (title, year)
//!
//! TMDb is queried when a key is configured; otherwise (or when TMDb has
//! nothing) the IMDb title page is scraped. Resolution never fails: on total
//! failure the raw identifier becomes the title with an unknown year.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::constants::endpoints;
use crate::models::{IdKind, MediaReference, ResolvedMetadata};
use crate::parser;
use crate::scraper::{FetchRequest, HttpFetch, ScraperError};

static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid punctuation regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Errors of a single metadata source
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Scraping(#[from] ScraperError),

    #[error("metadata response could not be decoded: {0}")]
    Decode(String),

    #[error("no metadata found for {0}")]
    NotFound(String),

    #[error("no TMDb key configured")]
    MissingKey,
}

/// Where the resolved metadata came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Tmdb,
    Scrape,
    /// Nothing answered; the title is the raw id
    RawId,
}

#[derive(Debug, Deserialize)]
struct TmdbFindResult {
    #[serde(default)]
    tv_results: Vec<TmdbSeries>,
}

#[derive(Debug, Deserialize)]
struct TmdbSeries {
    name: Option<String>,
    first_air_date: Option<String>,
}

impl TmdbSeries {
    fn into_metadata(self, fallback_title: &str) -> ResolvedMetadata {
        let year = self
            .first_air_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse::<u16>().ok())
            .unwrap_or(0);
        let title = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_title.to_string());
        ResolvedMetadata { title, year }
    }
}

/// Clean a title before searching: punctuation becomes space and
/// whitespace is collapsed
pub fn clean_title(title: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(title.trim(), " ");
    let spaced = PUNCTUATION_RE.replace_all(&collapsed, " ");
    WHITESPACE_RE.replace_all(&spaced, " ").trim().to_string()
}

/// Site search query for a cleaned title (`Show Name` -> `Show+Name`)
pub fn search_query(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join("+")
}

/// Resolves a [`MediaReference`] into a title and year
pub struct MetadataResolver {
    http: Arc<dyn HttpFetch>,
    config: Arc<Config>,
}

impl MetadataResolver {
    pub fn new(http: Arc<dyn HttpFetch>, config: Arc<Config>) -> Self {
        Self { http, config }
    }

    /// Resolve title and year, falling back source by source
    pub async fn resolve(&self, reference: &MediaReference) -> (ResolvedMetadata, MetadataSource) {
        let id = reference.external_id.as_str();

        let attempt = match reference.id_kind {
            IdKind::Tmdb => self
                .tmdb_series(id)
                .await
                .map(|m| (m, MetadataSource::Tmdb)),
            IdKind::Imdb => {
                let tmdb = if self.config.use_tmdb() {
                    self.tmdb_find(id).await
                } else {
                    Err(MetadataError::MissingKey)
                };
                match tmdb {
                    Ok(metadata) => Ok((metadata, MetadataSource::Tmdb)),
                    Err(e) => {
                        debug!(id, error = %e, "TMDb lookup unavailable, scraping reference page");
                        self.scrape_reference(id)
                            .await
                            .map(|m| (m, MetadataSource::Scrape))
                    }
                }
            }
        };

        match attempt {
            Ok((metadata, source)) => {
                debug!(id, title = %metadata.title, year = metadata.year, ?source, "metadata resolved");
                (metadata, source)
            }
            Err(e) => {
                warn!(id, error = %e, "metadata unresolved, using raw id");
                (
                    ResolvedMetadata {
                        title: id.to_string(),
                        year: 0,
                    },
                    MetadataSource::RawId,
                )
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: String) -> Result<T, MetadataError> {
        let response = self
            .http
            .fetch(FetchRequest::get(url).header("Accept", "application/json"))
            .await?
            .ensure_success()?;
        serde_json::from_str(&response.body).map_err(|e| MetadataError::Decode(e.to_string()))
    }

    /// `/find` lookup of an IMDb id
    async fn tmdb_find(&self, imdb_id: &str) -> Result<ResolvedMetadata, MetadataError> {
        let key = self.config.tmdb_key.as_deref().ok_or(MetadataError::MissingKey)?;
        let found: TmdbFindResult = self.get_json(endpoints::tmdb_find(imdb_id, key)).await?;
        found
            .tv_results
            .into_iter()
            .next()
            .map(|series| series.into_metadata(imdb_id))
            .ok_or_else(|| MetadataError::NotFound(imdb_id.to_string()))
    }

    /// `/tv/{id}` lookup of a TMDb id
    async fn tmdb_series(&self, tmdb_id: &str) -> Result<ResolvedMetadata, MetadataError> {
        let key = self.config.tmdb_key.as_deref().ok_or(MetadataError::MissingKey)?;
        let series: TmdbSeries = self.get_json(endpoints::tmdb_tv(tmdb_id, key)).await?;
        Ok(series.into_metadata(tmdb_id))
    }

    /// Title and year from the IMDb page `<title>`
    async fn scrape_reference(&self, imdb_id: &str) -> Result<ResolvedMetadata, MetadataError> {
        let response = self
            .http
            .fetch(FetchRequest::get(endpoints::imdb_title(imdb_id)))
            .await?
            .ensure_success()?;
        let (title, year) = parser::reference_page_title(&response.body)
            .ok_or_else(|| MetadataError::NotFound(imdb_id.to_string()))?;
        Ok(ResolvedMetadata { title, year })
    }
}
