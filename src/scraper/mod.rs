//! Scraper module for talking HTTP to the content site, the gate and the
//! hosting providers
//!
//! All network access goes through the [`HttpFetch`] trait. [`Scraper`] is
//! the reqwest implementation with browser-like headers, user agent
//! rotation, separate connect/read timeouts and bounded retry with backoff.
//! [`Session`] binds a transport to its own reqwest cookie jar, so cookies
//! issued on any redirect hop are replayed on later requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use crate::config::Config;

/// Errors that can occur during HTTP operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScraperError {
    /// Network-related errors (DNS failure, refused connection, etc.)
    #[error("Failed to connect to server: {0}")]
    NetworkError(String),

    /// Connect or read phase exceeded its bound
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// HTTP error status codes
    #[error("Server returned status {0}")]
    HttpError(u16),

    /// Error reading response body
    #[error("Failed to read response body: {0}")]
    ResponseError(String),

    /// Rate limited by server
    #[error("Rate limited, retry after delay")]
    RateLimited,

    /// Malformed URL handed to the client
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ScraperError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ScraperError::Timeout(_) | ScraperError::RateLimited => true,
            ScraperError::HttpError(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// HTTP verb of a [`FetchRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// A single outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    /// Extra headers; they replace the browser defaults of the same name
    pub headers: Vec<(String, String)>,
    /// URL-encoded form body (POST only)
    pub form: Option<Vec<(String, String)>>,
}

impl FetchRequest {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            form: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Add or replace a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Attach a form body
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    /// Ask for a single byte: follows redirects without downloading the body
    pub fn first_byte(self) -> Self {
        self.header("Range", crate::constants::forms::FIRST_BYTE_RANGE)
    }

    /// Value of a header set on this request
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Result of a request, whatever the status code
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after following redirects
    pub url: String,
    pub body: String,
}

impl FetchResponse {
    /// Turn 4xx/5xx statuses into errors
    pub fn ensure_success(self) -> Result<Self, ScraperError> {
        match self.status {
            429 => Err(ScraperError::RateLimited),
            s if s >= 400 => Err(ScraperError::HttpError(s)),
            _ => Ok(self),
        }
    }
}

/// Transport abstraction used by every pipeline stage
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Send one request and return the response, following redirects
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ScraperError>;

    /// Same transport, keeping cookies in `jar` across requests and
    /// redirect hops
    fn with_cookies(&self, jar: Arc<Jar>) -> Result<Arc<dyn HttpFetch>, ScraperError>;
}

/// Host part of a URL, lowercase
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// `scheme://host[:port]` of a URL
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.origin() {
        url::Origin::Tuple(..) => Some(parsed.origin().ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// Configuration for the reqwest-backed scraper
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Whether to rotate user agents
    pub rotate_user_agent: bool,
    /// Maximum attempts for GET requests on transient failures
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    pub backoff_base_ms: u64,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Timeout between body reads
    pub read_timeout: Duration,
    /// Overall request timeout
    pub request_timeout: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            rotate_user_agent: true,
            max_retries: 3,
            backoff_base_ms: 500,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for ScraperConfig {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            request_timeout: config.request_timeout,
            ..Self::default()
        }
    }
}

/// List of realistic user agents for rotation
const USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    // Chrome on Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    // Safari on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    // Firefox on Linux
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:123.0) Gecko/20100101 Firefox/123.0",
];

/// reqwest-backed [`HttpFetch`] with anti-detection headers
pub struct Scraper {
    client: Client,
    config: ScraperConfig,
}

impl Scraper {
    /// Create a new Scraper with default configuration
    pub fn new() -> Result<Self, ScraperError> {
        Self::with_config(ScraperConfig::default())
    }

    /// Create a new Scraper with custom configuration
    pub fn with_config(config: ScraperConfig) -> Result<Self, ScraperError> {
        let client = Self::client_builder(&config)
            .build()
            .map_err(|e| ScraperError::NetworkError(format!("client build: {e}")))?;

        Ok(Self { client, config })
    }

    fn client_builder(config: &ScraperConfig) -> ClientBuilder {
        Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
    }

    /// Get a random user agent from the list
    fn get_user_agent(&self) -> &'static str {
        if self.config.rotate_user_agent {
            let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
            USER_AGENTS[idx]
        } else {
            USER_AGENTS[0]
        }
    }

    /// Apply exponential backoff delay
    async fn apply_backoff(&self, attempt: u32) {
        let delay = self.config.backoff_base_ms * 2u64.pow(attempt);
        let jitter = rand::thread_rng().gen_range(0..250);
        sleep(Duration::from_millis(delay + jitter)).await;
    }

    /// Browser defaults, overridden by the request's own headers
    fn build_headers(&self, request: &FetchRequest) -> Result<HeaderMap, ScraperError> {
        let mut headers = HeaderMap::new();
        let defaults = [
            ("user-agent", self.get_user_agent()),
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
            ("accept-language", "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7"),
            ("cache-control", "no-cache"),
            ("pragma", "no-cache"),
            ("upgrade-insecure-requests", "1"),
        ];
        for (name, value) in defaults {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ScraperError::InvalidUrl(format!("header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ScraperError::InvalidUrl(format!("header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Internal fetch implementation, one attempt
    async fn do_fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ScraperError> {
        let url = Url::parse(&request.url)
            .map_err(|e| ScraperError::InvalidUrl(format!("{}: {e}", request.url)))?;
        let headers = self.build_headers(request)?;

        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let mut builder = builder.headers(headers);
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ScraperError::Timeout(request.url.clone())
            } else if e.is_connect() {
                ScraperError::NetworkError("Failed to connect to server".to_string())
            } else {
                ScraperError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ScraperError::Timeout(request.url.clone())
            } else {
                ScraperError::ResponseError(e.to_string())
            }
        })?;

        Ok(FetchResponse {
            status,
            url: final_url,
            body,
        })
    }
}

#[async_trait]
impl HttpFetch for Scraper {
    /// GETs are retried with backoff on 429/5xx/timeouts; other verbs are
    /// sent once since the gate and provider forms are not idempotent
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ScraperError> {
        let attempts = if request.method == Method::Get {
            self.config.max_retries.max(1)
        } else {
            1
        };
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                self.apply_backoff(attempt).await;
            }

            let outcome = self
                .do_fetch(&request)
                .await
                .and_then(|response| match response.status {
                    429 => Err(ScraperError::RateLimited),
                    s if s >= 500 => Err(ScraperError::HttpError(s)),
                    _ => Ok(response),
                });

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    tracing::warn!(url = %request.url, attempt = attempt + 1, error = %e, "transient failure, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ScraperError::NetworkError("Max retries exceeded".to_string())))
    }

    fn with_cookies(&self, jar: Arc<Jar>) -> Result<Arc<dyn HttpFetch>, ScraperError> {
        let client = Self::client_builder(&self.config)
            .cookie_provider(jar)
            .build()
            .map_err(|e| ScraperError::NetworkError(format!("client build: {e}")))?;
        Ok(Arc::new(Self {
            client,
            config: self.config.clone(),
        }))
    }
}

/// Split a `Cookie` header value into its pairs
fn cookie_pairs(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// A transport plus the cookie jar of one logical browsing session
pub struct Session {
    http: Arc<dyn HttpFetch>,
    jar: Arc<Jar>,
}

impl Session {
    pub fn new(http: &Arc<dyn HttpFetch>) -> Result<Self, ScraperError> {
        let jar = Arc::new(Jar::default());
        Ok(Self {
            http: http.with_cookies(jar.clone())?,
            jar,
        })
    }

    /// Send a request; cookies are replayed and collected by the jar
    pub async fn send(&self, request: FetchRequest) -> Result<FetchResponse, ScraperError> {
        self.http.fetch(request).await
    }

    /// Set a host-only cookie for the host of `url`
    pub fn set_cookie(&self, url: &str, name: &str, value: &str) -> Result<(), ScraperError> {
        let url = Url::parse(url).map_err(|e| ScraperError::InvalidUrl(format!("{url}: {e}")))?;
        self.jar.add_cookie_str(&format!("{name}={value}; Path=/"), &url);
        Ok(())
    }

    /// Set a cookie for both the bare and the `www.` form of the host of
    /// `url`
    pub fn set_for_site(&self, url: &str, name: &str, value: &str) -> Result<(), ScraperError> {
        let parsed =
            Url::parse(url).map_err(|e| ScraperError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ScraperError::InvalidUrl(url.to_string()))?;
        let bare = host.trim_start_matches("www.");
        for site in [bare.to_string(), format!("www.{bare}")] {
            self.set_cookie(&format!("{}://{site}/", parsed.scheme()), name, value)?;
        }
        Ok(())
    }

    /// Cookies the jar would send to `url`
    pub fn cookies_for(&self, url: &str) -> BTreeMap<String, String> {
        let Ok(url) = Url::parse(url) else {
            return BTreeMap::new();
        };
        self.jar
            .cookies(&url)
            .and_then(|header| header.to_str().ok().map(cookie_pairs))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetch, FakeResponse};

    #[test]
    fn test_scraper_creation() {
        let scraper = Scraper::new().unwrap();
        assert_eq!(scraper.config.max_retries, 3);
    }

    #[test]
    fn test_scraper_with_config() {
        let config = ScraperConfig {
            rotate_user_agent: false,
            max_retries: 5,
            backoff_base_ms: 2000,
            ..ScraperConfig::default()
        };
        let scraper = Scraper::with_config(config).unwrap();
        assert_eq!(scraper.config.max_retries, 5);
        assert_eq!(scraper.get_user_agent(), USER_AGENTS[0]);
    }

    #[test]
    fn test_user_agent_rotation() {
        let scraper = Scraper::new().unwrap();
        let ua = scraper.get_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }

    #[test]
    fn test_request_headers_override_defaults() {
        let scraper = Scraper::new().unwrap();
        let request = FetchRequest::get("https://a.test/").header("User-Agent", "custom");
        let headers = scraper.build_headers(&request).unwrap();
        assert_eq!(headers.get("user-agent").unwrap(), "custom");
        assert_eq!(headers.get_all("user-agent").iter().count(), 1);
        assert!(headers.contains_key("accept-language"));
    }

    #[test]
    fn test_fetch_request_builder() {
        let request = FetchRequest::get("https://a.test/")
            .header("Referer", "x")
            .header("referer", "y")
            .first_byte();
        assert_eq!(request.header_value("Referer"), Some("y"));
        assert_eq!(request.header_value("range"), Some("bytes=0-0"));
        assert_eq!(request.headers.len(), 2);
    }

    #[test]
    fn test_cookie_pairs() {
        let pairs = cookie_pairs("captcha=abc123; sid=a=b; =x; novalue");
        assert_eq!(pairs.get("captcha").map(String::as_str), Some("abc123"));
        assert_eq!(pairs.get("sid").map(String::as_str), Some("a=b"));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_ensure_success() {
        let ok = FetchResponse {
            status: 206,
            ..FetchResponse::default()
        };
        assert!(ok.ensure_success().is_ok());
        let limited = FetchResponse {
            status: 429,
            ..FetchResponse::default()
        };
        assert_eq!(limited.ensure_success().unwrap_err(), ScraperError::RateLimited);
        let missing = FetchResponse {
            status: 404,
            ..FetchResponse::default()
        };
        assert_eq!(missing.ensure_success().unwrap_err(), ScraperError::HttpError(404));
    }

    #[test]
    fn test_transient_errors() {
        assert!(ScraperError::Timeout("x".into()).is_transient());
        assert!(ScraperError::HttpError(503).is_transient());
        assert!(!ScraperError::HttpError(404).is_transient());
        assert!(!ScraperError::NetworkError("x".into()).is_transient());
    }

    #[test]
    fn test_origin_and_host() {
        assert_eq!(host_of("https://WWW.Example.com/a"), Some("www.example.com".to_string()));
        assert_eq!(origin_of("https://deltabit.co/abc?x=1"), Some("https://deltabit.co".to_string()));
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn test_cookies_for_site_cover_www() {
        let http: Arc<dyn HttpFetch> = Arc::new(FakeFetch::new());
        let session = Session::new(&http).unwrap();
        session
            .set_for_site("https://www.gate.test/abc", "token", "v1")
            .unwrap();
        assert_eq!(session.cookies_for("https://gate.test/x").get("token").map(String::as_str), Some("v1"));
        assert_eq!(session.cookies_for("https://www.gate.test/x").len(), 1);
        assert!(session.cookies_for("https://other.test/").is_empty());
    }

    #[tokio::test]
    async fn test_session_sends_and_absorbs_cookies() {
        let fake = Arc::new(FakeFetch::new());
        fake.route(
            Method::Get,
            "https://gate.test/a",
            FakeResponse::html("ok").with_cookie("sid", "42"),
        );
        fake.route(Method::Get, "https://gate.test/b", FakeResponse::html("ok"));

        let http: Arc<dyn HttpFetch> = fake.clone();
        let session = Session::new(&http).unwrap();
        session.send(FetchRequest::get("https://gate.test/a")).await.unwrap();
        session.send(FetchRequest::get("https://gate.test/b")).await.unwrap();

        let requests = fake.requests();
        assert_eq!(requests[0].header_value("Cookie"), None);
        assert_eq!(requests[1].header_value("Cookie"), Some("sid=42"));
    }

    /// Minimal HTTP/1.1 server: `/start` redirects to `/landing` and sets a
    /// cookie on the 302; every request line is recorded with its `Cookie`
    async fn redirecting_server() -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let path = head.split_whitespace().nth(1).unwrap_or("").to_string();
                let cookie = head
                    .lines()
                    .find_map(|l| {
                        l.split_once(':')
                            .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
                            .map(|(_, v)| v.trim().to_string())
                    })
                    .unwrap_or_default();
                log.lock().unwrap().push(format!("{path} [{cookie}]"));

                let response = if path == "/start" {
                    "HTTP/1.1 302 Found\r\nLocation: /landing\r\nSet-Cookie: sid=gate1; Path=/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_string()
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (base, seen)
    }

    #[tokio::test]
    async fn test_cookie_set_on_redirect_hop_is_replayed() {
        let (base, seen) = redirecting_server().await;
        let http: Arc<dyn HttpFetch> = Arc::new(
            Scraper::with_config(ScraperConfig {
                max_retries: 1,
                ..ScraperConfig::default()
            })
            .unwrap(),
        );
        let session = Session::new(&http).unwrap();

        let landing = session
            .send(FetchRequest::get(format!("{base}/start")))
            .await
            .unwrap();
        assert_eq!(landing.url, format!("{base}/landing"));
        session
            .send(FetchRequest::get(format!("{base}/next")))
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "/start []".to_string(),
                "/landing [sid=gate1]".to_string(),
                "/next [sid=gate1]".to_string(),
            ]
        );
        assert_eq!(
            session.cookies_for(&format!("{base}/")).get("sid").map(String::as_str),
            Some("gate1")
        );
    }
}
