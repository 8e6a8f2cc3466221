//! Provider-specific media URL extraction
//!
//! Every provider link first crosses the gate (see [`crate::gate`]), then
//! runs the grammar of its provider:
//!
//! - Deltabit: landing page fetched twice, hidden form posted after a short
//!   human-like wait, media URL read from the response. One re-post.
//! - MixDrop: alternate domains and embed paths rewritten to the canonical
//!   ones; the rewritten URL is the result.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::forms;
use crate::gate::{GateError, Landing, RedirectResolver};
use crate::models::{HostLink, HostType};
use crate::parser;
use crate::scraper::{origin_of, FetchRequest, HttpFetch, ScraperError, Session};

/// Form posts per Deltabit link (the first try plus one retry)
pub const MAX_FORM_ATTEMPTS: u32 = 2;

/// Browser identity kept for the whole provider exchange
const PROVIDER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// Provider extraction failures
#[derive(Error, Debug)]
pub enum HostError {
    #[error("gate traversal failed: {0}")]
    Gate(#[from] GateError),

    #[error("provider request failed: {0}")]
    Scraping(#[from] ScraperError),

    #[error("no media URL after {attempts} attempts")]
    NoMediaUrl { attempts: u32 },
}

/// A direct media reference extracted from a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMedia {
    pub url: String,
    /// File name advertised by the provider, if any
    pub file_name: Option<String>,
}

fn cut_at_segment(url: &str) -> String {
    url.split("/2").next().unwrap_or(url).to_string()
}

/// Rewrite alternate MixDrop domains/paths to the canonical embed URL
///
/// `mixdrop.club/f/x/2...` -> `mixdrop.cv/f/x`,
/// `mixdrop.cfd/emb/x/2...` -> `mixdrop.cv/e/x`
pub fn rewrite_mixdrop(url: &str) -> String {
    let mut url = url.to_string();
    if url.contains("club") {
        url = cut_at_segment(&url.replace("club", "cv"));
    }
    if url.contains("cfd") {
        url = cut_at_segment(&url.replace("cfd", "cv").replace("emb", "e"));
    }
    url
}

/// Resolves provider links into media URLs
pub struct HostExtractor {
    http: Arc<dyn HttpFetch>,
    resolver: Arc<RedirectResolver>,
    config: Arc<Config>,
}

impl HostExtractor {
    pub fn new(http: Arc<dyn HttpFetch>, resolver: Arc<RedirectResolver>, config: Arc<Config>) -> Self {
        Self {
            http,
            resolver,
            config,
        }
    }

    /// Resolve one link with its own session
    pub async fn extract(&self, link: &HostLink) -> Result<ExtractedMedia, HostError> {
        let session = Session::new(&self.http)?;
        let landing = self.resolver.resolve(&session, &link.url).await?;
        debug!(player = %link.host_type, landing = %landing.url, "provider page reached");

        match link.host_type {
            HostType::Deltabit => self.deltabit(&session, &landing).await,
            HostType::Mixdrop => Ok(self.mixdrop(&landing.url)),
        }
    }

    fn mixdrop(&self, landing: &str) -> ExtractedMedia {
        let url = rewrite_mixdrop(landing);
        if self.config.relay {
            debug!(url = %url, "relay mode, returning embed URL as-is");
        } else {
            debug!(url = %url, "returning rewritten embed URL");
        }
        ExtractedMedia {
            url,
            file_name: None,
        }
    }

    async fn deltabit(&self, session: &Session, landing: &Landing) -> Result<ExtractedMedia, HostError> {
        let resolved = session
            .send(
                FetchRequest::get(landing.url.as_str())
                    .header("User-Agent", PROVIDER_USER_AGENT)
                    .first_byte(),
            )
            .await?;

        let gate_referer = format!("{}/", landing.gate_origin.trim_end_matches('/'));
        let page = session
            .send(
                FetchRequest::get(resolved.url.as_str())
                    .header("User-Agent", PROVIDER_USER_AGENT)
                    .header("Referer", gate_referer),
            )
            .await?
            .ensure_success()?;
        let page_url = page.url;
        let origin = origin_of(&page_url).unwrap_or_else(|| page_url.clone());

        let mut form = parser::parse_form_inputs(&page.body);
        let file_name = form
            .iter()
            .find(|(name, _)| name == forms::FILE_NAME_FIELD)
            .map(|(_, value)| value.clone())
            .filter(|value| !value.trim().is_empty());
        form.retain(|(name, _)| name != forms::HUMAN_FIELD && name != "referer");
        form.push((forms::HUMAN_FIELD.to_string(), String::new()));
        form.push(("referer".to_string(), page_url.clone()));

        sleep(self.config.human_delay).await;

        for attempt in 1..=MAX_FORM_ATTEMPTS {
            if attempt > 1 {
                sleep(self.config.retry_delay).await;
            }
            let request = FetchRequest::post(page_url.as_str())
                .header("User-Agent", PROVIDER_USER_AGENT)
                .header("Origin", origin.as_str())
                .header("Referer", page_url.as_str())
                .form(form.clone());
            let response = session.send(request).await?;

            if let Some(url) = parser::media_url(&response.body) {
                info!(attempt, url = %url, "deltabit media URL found");
                return Ok(ExtractedMedia {
                    url,
                    file_name: file_name.clone(),
                });
            }
            debug!(attempt, status = response.status, "no media URL in deltabit response");
        }

        warn!(page = %page_url, "deltabit gave no media URL");
        Err(HostError::NoMediaUrl {
            attempts: MAX_FORM_ATTEMPTS,
        })
    }
}
