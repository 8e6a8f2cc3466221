//! On-disk cache of gate passage cookies
//!
//! One small JSON file per gate host holds the cookie map issued after the
//! last solved challenge. A missing or corrupt file is an empty cache.
//! Traversals of the same gate take a per-host lock around the whole
//! read-solve-write sequence so concurrent links never race on the file.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// Cookie map of one gate
pub type CookieMap = BTreeMap<String, String>;

/// Shared, file-backed cookie cache keyed by gate host
#[derive(Debug)]
pub struct GateCookieCache {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GateCookieCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// File holding the cookies of `host`
    pub fn path_for(&self, host: &str) -> PathBuf {
        let safe: String = host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("gate-cookies-{safe}.json"))
    }

    /// Exclusive access to the cache entry of `host`
    pub async fn lock(&self, host: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.entry(host.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Cached cookies of `host`; empty when absent or unreadable
    pub async fn load(&self, host: &str) -> CookieMap {
        let path = self.path_for(host);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(_) => return CookieMap::new(),
        };
        match serde_json::from_str::<CookieMap>(raw.trim()) {
            Ok(map) => map,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring corrupt cookie cache");
                CookieMap::new()
            }
        }
    }

    /// Replace the cached cookies of `host`; failures are logged only
    pub async fn store(&self, host: &str, cookies: &CookieMap) {
        let path = self.path_for(host);
        let json = match serde_json::to_string(cookies) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "cookie cache serialization failed");
                return;
            }
        };
        let tmp = path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "cookie cache write failed");
        }
    }

    /// Forget the cookies of `host`
    pub async fn clear(&self, host: &str) {
        let path = self.path_for(host);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(host, "cleared gate cookie cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cookie cache removal failed"),
        }
    }
}
