//! Offline test doubles: a scripted transport and a counting OCR engine

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use url::Url;

use crate::config::Config;
use crate::gate::ocr::DigitRecognizer;
use crate::scraper::{FetchRequest, FetchResponse, HttpFetch, Method, ScraperError};

/// Scripted reply of [`FakeFetch`]
#[derive(Debug, Clone)]
pub(crate) struct FakeResponse {
    status: u16,
    body: String,
    final_url: Option<String>,
    cookies: Vec<String>,
    error: Option<ScraperError>,
}

impl FakeResponse {
    pub(crate) fn html(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            final_url: None,
            cookies: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::html("")
        }
    }

    pub(crate) fn error(error: ScraperError) -> Self {
        Self {
            error: Some(error),
            ..Self::html("")
        }
    }

    /// Pretend the request was redirected to `url`
    pub(crate) fn redirected_to(mut self, url: &str) -> Self {
        self.final_url = Some(url.to_string());
        self
    }

    /// `Set-Cookie` on the final response
    pub(crate) fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push(format!("{name}={value}; Path=/"));
        self
    }
}

#[derive(Default)]
struct Script {
    routes: Mutex<HashMap<(Method, String), VecDeque<FakeResponse>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

/// Transport answering from a route table
///
/// Several replies on one route are served in order; the last one repeats.
/// Unrouted requests fail with a network error. Copies made by
/// `with_cookies` share the script and replay cookies like a browser jar.
#[derive(Default)]
pub(crate) struct FakeFetch {
    script: Arc<Script>,
    jar: Option<Arc<Jar>>,
}

impl FakeFetch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(&self, method: Method, url: &str, response: FakeResponse) {
        self.script
            .routes
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Every request received so far
    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.script.requests.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, method: Method, url: &str) -> usize {
        self.script
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }
}

#[async_trait]
impl HttpFetch for FakeFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ScraperError> {
        let request = match (&self.jar, Url::parse(&request.url)) {
            (Some(jar), Ok(url)) if request.header_value("Cookie").is_none() => {
                match jar.cookies(&url).and_then(|h| h.to_str().ok().map(str::to_string)) {
                    Some(cookie) => request.header("Cookie", cookie),
                    None => request,
                }
            }
            _ => request,
        };
        self.script.requests.lock().unwrap().push(request.clone());
        let scripted = {
            let mut routes = self.script.routes.lock().unwrap();
            routes
                .get_mut(&(request.method, request.url.clone()))
                .and_then(|queue| {
                    if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    }
                })
        };
        let Some(scripted) = scripted else {
            return Err(ScraperError::NetworkError(format!("no route for {}", request.url)));
        };
        if let Some(error) = scripted.error {
            return Err(error);
        }
        let url = scripted.final_url.unwrap_or(request.url);
        if let (Some(jar), Ok(parsed)) = (&self.jar, Url::parse(&url)) {
            let headers: Vec<HeaderValue> = scripted
                .cookies
                .iter()
                .filter_map(|c| HeaderValue::from_str(c).ok())
                .collect();
            jar.set_cookies(&mut headers.iter(), &parsed);
        }
        Ok(FetchResponse {
            status: scripted.status,
            url,
            body: scripted.body,
        })
    }

    fn with_cookies(&self, jar: Arc<Jar>) -> Result<Arc<dyn HttpFetch>, ScraperError> {
        Ok(Arc::new(FakeFetch {
            script: self.script.clone(),
            jar: Some(jar),
        }))
    }
}

/// OCR double returning fixed digits and counting calls
pub(crate) struct CountingOcr {
    digits: String,
    available: bool,
    calls: AtomicUsize,
}

impl CountingOcr {
    pub(crate) fn new(digits: &str) -> Self {
        Self {
            digits: digits.to_string(),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new("")
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DigitRecognizer for CountingOcr {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn recognize(&self, _image_base64: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available {
            self.digits.clone()
        } else {
            String::new()
        }
    }
}

/// Default configuration without human-emulation waits
pub(crate) fn fast_config() -> Config {
    Config {
        site_base_url: "https://site.test".to_string(),
        human_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        ..Config::default()
    }
}

/// Post endpoint body with a rendered title and content
pub(crate) fn post_json(title: &str, content: &str) -> String {
    serde_json::json!({
        "title": { "rendered": title },
        "content": { "rendered": content },
    })
    .to_string()
}
