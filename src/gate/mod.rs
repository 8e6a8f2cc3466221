//! Redirect and anti-bot gate traversal
//!
//! Turns an episode anchor into the provider page it ultimately points at:
//! the anchor is followed through the redirect layer, the gate page is
//! fetched with any cached passage cookies, a cookie-assignment script is
//! honoured when present, and an image CAPTCHA is solved with digit OCR
//! when the gate insists on one.

pub mod cookies;
pub mod ocr;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::constants::forms;
use crate::parser;
use crate::scraper::{host_of, origin_of, FetchRequest, FetchResponse, ScraperError, Session};

use self::cookies::GateCookieCache;
use self::ocr::DigitRecognizer;

/// CAPTCHA submissions before the gate is declared failed
pub const MAX_CAPTCHA_ATTEMPTS: u32 = 2;

/// Gate traversal failures
#[derive(Error, Debug)]
pub enum GateError {
    #[error("gate request failed: {0}")]
    Scraping(#[from] ScraperError),

    #[error("captcha not solved after {attempts} attempts")]
    CaptchaExhausted { attempts: u32 },

    #[error("captcha not solved, OCR engine unavailable")]
    OcrUnavailable,

    #[error("gate page has no proceed link")]
    NoProceedLink,

    #[error("invalid gate URL: {0}")]
    InvalidUrl(String),
}

/// Resolve `href` against the page it was found on
fn absolute_url(base: &str, href: &str) -> Result<String, GateError> {
    let base = Url::parse(base).map_err(|e| GateError::InvalidUrl(format!("{base}: {e}")))?;
    base.join(href)
        .map(|u| u.to_string())
        .map_err(|e| GateError::InvalidUrl(format!("{href}: {e}")))
}

fn is_captcha_page(page: &FetchResponse) -> bool {
    parser::captcha_image_data(&page.body).is_some()
}

/// Where a gate traversal ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landing {
    /// Provider page behind the gate
    pub url: String,
    /// Origin of the gate that was crossed
    pub gate_origin: String,
}

/// Crosses the redirect layer and the gate for one anchor
pub struct RedirectResolver {
    cache: Arc<GateCookieCache>,
    ocr: Arc<dyn DigitRecognizer>,
    config: Arc<Config>,
}

impl RedirectResolver {
    pub fn new(cache: Arc<GateCookieCache>, ocr: Arc<dyn DigitRecognizer>, config: Arc<Config>) -> Self {
        Self { cache, ocr, config }
    }

    /// Follow `anchor_url` to the provider page behind the gate
    ///
    /// # Arguments
    /// * `session` - Cookie jar of the link being resolved
    /// * `anchor_url` - `href` of the provider anchor in the episode row
    ///
    /// # Returns
    /// The provider landing page and the origin of the gate crossed
    pub async fn resolve(&self, session: &Session, anchor_url: &str) -> Result<Landing, GateError> {
        let hop = session.send(FetchRequest::get(anchor_url).first_byte()).await?;
        let gate_url = hop.url;
        let gate_host =
            host_of(&gate_url).ok_or_else(|| GateError::InvalidUrl(gate_url.clone()))?;
        let gate_origin = origin_of(&gate_url).unwrap_or_else(|| self.config.gate_origin.clone());
        debug!(anchor = anchor_url, gate = %gate_url, "redirect layer resolved");

        let _guard = self.cache.lock(&gate_host).await;
        let cached = self.cache.load(&gate_host).await;
        if !cached.is_empty() {
            debug!(host = %gate_host, count = cached.len(), "using cached gate cookies");
            for (name, value) in &cached {
                session.set_cookie(&gate_url, name, value)?;
            }
        }

        let mut page = session.send(FetchRequest::get(gate_url.as_str())).await?;

        if let Some(challenge) = parser::cookie_challenge(&page.body) {
            info!(host = %gate_host, cookie = %challenge.name, "gate cookie challenge");
            session.set_for_site(&page.url, &challenge.name, &challenge.value)?;
            let next = match challenge.redirect.as_deref() {
                Some(target) => absolute_url(&page.url, target)?,
                None => page.url.clone(),
            };
            page = session.send(FetchRequest::get(next)).await?;
            self.persist(session, &gate_url, &gate_host).await;
        }

        let url = if is_captcha_page(&page) {
            self.solve_captcha(session, &gate_url, &gate_host, &gate_origin, page)
                .await?
        } else if host_of(&page.url).as_deref() != Some(gate_host.as_str()) {
            debug!(landing = %page.url, "gate redirected straight to provider");
            page.url
        } else {
            match parser::first_anchor_href(&page.body) {
                Some(href) => absolute_url(&page.url, &href)?,
                None => return Err(GateError::NoProceedLink),
            }
        };
        Ok(Landing { url, gate_origin })
    }

    /// Save the gate cookies the session holds
    async fn persist(&self, session: &Session, gate_url: &str, gate_host: &str) {
        let cookies = session.cookies_for(gate_url);
        if !cookies.is_empty() {
            self.cache.store(gate_host, &cookies).await;
        }
    }

    /// Submit OCR'd digits until the gate hands out a proceed link
    async fn solve_captcha(
        &self,
        session: &Session,
        gate_url: &str,
        gate_host: &str,
        gate_origin: &str,
        mut page: FetchResponse,
    ) -> Result<String, GateError> {
        for attempt in 1..=MAX_CAPTCHA_ATTEMPTS {
            if !is_captcha_page(&page) {
                page = session.send(FetchRequest::get(gate_url)).await?;
            }
            let image = parser::captcha_image_data(&page.body).unwrap_or_default();
            let digits = self.ocr.recognize(&image).await;
            info!(attempt, digits = %digits, "submitting gate captcha");

            let request = FetchRequest::post(gate_url)
                .header("Origin", gate_origin)
                .header("Referer", gate_url)
                .form(vec![(forms::CAPTCHA_FIELD.to_string(), digits)]);
            let response = session.send(request).await?;

            if !is_captcha_page(&response) {
                if let Some(href) = parser::first_anchor_href(&response.body) {
                    self.persist(session, gate_url, gate_host).await;
                    return absolute_url(&response.url, &href);
                }
            }
            page = response;
        }

        self.cache.clear(gate_host).await;
        if self.ocr.is_available().await {
            warn!(attempts = MAX_CAPTCHA_ATTEMPTS, "gate captcha exhausted");
            Err(GateError::CaptchaExhausted {
                attempts: MAX_CAPTCHA_ATTEMPTS,
            })
        } else {
            warn!("gate captcha failed without an OCR engine");
            Err(GateError::OcrUnavailable)
        }
    }
}
