//! Configuration module for the stream scraper
//!
//! Handles loading environment variables; CLI flags are layered on top in
//! `main`.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::SearchMode;

/// How title/year metadata is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InfoMode {
    /// TMDb when a key is configured, otherwise scrape
    #[default]
    Auto,
    /// Always try TMDb first (falls back to scrape without a key)
    Tmdb,
    /// Always scrape the reference page
    Scrape,
}

impl InfoMode {
    fn from_env_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "tmdb" => InfoMode::Tmdb,
            "scrape" => InfoMode::Scrape,
            _ => InfoMode::Auto,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the content site
    pub site_base_url: String,
    /// TMDb API key
    pub tmdb_key: Option<String>,
    /// Metadata lookup strategy
    pub info_mode: InfoMode,
    /// Title matching strategy
    pub search_mode: SearchMode,
    /// Origin of the anti-bot gate, sent as referer to providers
    pub gate_origin: String,
    /// Directory holding the gate cookie cache
    pub cookie_dir: PathBuf,
    /// OCR executable
    pub ocr_binary: String,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Timeout between body reads
    pub read_timeout: Duration,
    /// Overall per-request timeout
    pub request_timeout: Duration,
    /// Wait before posting a provider form
    pub human_delay: Duration,
    /// Extra wait before the single form re-post
    pub retry_delay: Duration,
    /// Relay mode: URL-rewrite providers return the rewritten URL untouched
    pub relay: bool,
    /// Verbose tracing on stderr
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_base_url: "https://eurostreaming.garden".to_string(),
            tmdb_key: None,
            info_mode: InfoMode::Auto,
            search_mode: SearchMode::Advanced,
            gate_origin: "https://safego.cc".to_string(),
            cookie_dir: env::temp_dir(),
            ocr_binary: "tesseract".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            human_delay: Duration::from_millis(2500),
            retry_delay: Duration::from_millis(1500),
            relay: false,
            debug: false,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_string(key)
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env_string(key)
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Parse the `0`/`1`/`true`/`false` style flags used by the CLI and env
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or malformed values fall back to the defaults; nothing here
    /// is required.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            site_base_url: env_string("ES_DOMAIN")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.site_base_url),
            tmdb_key: env_string("TMDB_KEY"),
            info_mode: env_string("ES_INFO_MODE")
                .map(|s| InfoMode::from_env_value(&s))
                .unwrap_or_default(),
            search_mode: match env_string("ES_SEARCH_MODE").as_deref() {
                Some(mode) if mode.eq_ignore_ascii_case("legacy") => SearchMode::Legacy,
                _ => SearchMode::Advanced,
            },
            gate_origin: env_string("ES_GATE_ORIGIN")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gate_origin),
            cookie_dir: env_string("ES_COOKIE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cookie_dir),
            ocr_binary: env_string("TESSERACT_BIN").unwrap_or(defaults.ocr_binary),
            connect_timeout: env_secs("ES_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            read_timeout: env_secs("ES_READ_TIMEOUT_SECS", defaults.read_timeout),
            request_timeout: env_secs("ES_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            human_delay: env_millis("ES_HUMAN_DELAY_MS", defaults.human_delay),
            retry_delay: env_millis("ES_RETRY_DELAY_MS", defaults.retry_delay),
            relay: false,
            debug: env_string("ES_DEBUG").is_some_and(|s| parse_flag(&s)),
        }
    }

    /// Whether TMDb should be queried for metadata
    pub fn use_tmdb(&self) -> bool {
        match self.info_mode {
            InfoMode::Scrape => false,
            InfoMode::Tmdb | InfoMode::Auto => self.tmdb_key.is_some(),
        }
    }
}
