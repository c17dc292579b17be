//! External script loading.
//!
//! Fetches are awaitable tasks gathered with `join_all`. A failed or hung
//! fetch turns into an [`Error::ScriptLoad`] warning and never blocks the
//! other scripts of the slide.

use crate::error::{Error, Result};
use crate::script::ScriptRef;
use futures::future::{join_all, BoxFuture};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Source of external script bodies
pub trait ScriptFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Production fetcher over HTTP(S)
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ScriptFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::NetworkError(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::NetworkError(format!("HTTP {}", status.as_u16())));
            }
            resp.text().await.map_err(|e| Error::NetworkError(e.to_string()))
        })
    }
}

/// Everything a load pass produced: bodies keyed by URL plus per-URL failures
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub loaded: HashMap<String, String>,
    pub failures: Vec<Error>,
}

impl LoadOutcome {
    pub fn get(&self, url: &str) -> Option<&str> {
        self.loaded.get(url).map(String::as_str)
    }

    /// Merge `other` into `self`; bodies already present are kept
    pub fn extend(&mut self, other: LoadOutcome) {
        for (url, body) in other.loaded {
            self.loaded.entry(url).or_insert(body);
        }
        self.failures.extend(other.failures);
    }
}

pub struct ScriptLoader {
    fetcher: Arc<dyn ScriptFetcher>,
    timeout: Duration,
}

impl ScriptLoader {
    pub fn new(fetcher: Arc<dyn ScriptFetcher>, timeout_ms: u64) -> Self {
        Self {
            fetcher,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Fetch every external script in `scripts` concurrently and wait for all
    /// of them to either load or fail. Inline scripts are ignored; duplicate
    /// URLs are fetched once.
    pub async fn load(&self, scripts: &[ScriptRef]) -> LoadOutcome {
        let mut urls: Vec<&str> = Vec::new();
        for url in scripts.iter().filter_map(ScriptRef::url) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        if urls.is_empty() {
            return LoadOutcome::default();
        }

        debug!("fetching {} external script(s)", urls.len());
        let timeout_ms = self.timeout.as_millis() as u64;
        let results = join_all(urls.iter().map(|url| async move {
            let res = match tokio::time::timeout(self.timeout, self.fetcher.fetch(url)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(timeout_ms)),
            };
            (*url, res)
        }))
        .await;

        let mut outcome = LoadOutcome::default();
        for (url, res) in results {
            match res {
                Ok(body) => {
                    outcome.loaded.insert(url.to_string(), body);
                }
                Err(e) => {
                    warn!("script {} failed to load: {}", url, e);
                    outcome.failures.push(Error::ScriptLoad {
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ScriptScope, ScriptSource};
    use std::sync::Mutex;

    struct MapFetcher {
        delays: HashMap<&'static str, u64>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptFetcher for MapFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(url.to_string());
                match self.delays.get(url) {
                    Some(ms) => {
                        tokio::time::sleep(Duration::from_millis(*ms)).await;
                        Ok(format!("/* {} */", url))
                    }
                    None => Err(Error::NetworkError("HTTP 404".into())),
                }
            })
        }
    }

    fn external(url: &str, order: usize) -> ScriptRef {
        ScriptRef {
            source: ScriptSource::External { url: url.into() },
            slide: Some(1),
            scope: ScriptScope::Slide,
            order,
        }
    }

    #[tokio::test]
    async fn failures_and_timeouts_become_warnings() {
        let fetcher = Arc::new(MapFetcher {
            delays: HashMap::from([("https://a/ok.js", 5), ("https://a/slow.js", 5_000)]),
            calls: Mutex::new(Vec::new()),
        });
        let loader = ScriptLoader::new(fetcher.clone(), 100);
        let scripts = vec![
            external("https://a/ok.js", 0),
            external("https://a/missing.js", 1),
            external("https://a/slow.js", 2),
            external("https://a/ok.js", 3),
        ];

        let outcome = loader.load(&scripts).await;
        assert_eq!(outcome.get("https://a/ok.js"), Some("/* https://a/ok.js */"));
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome
            .failures
            .iter()
            .all(|e| matches!(e, Error::ScriptLoad { .. }) && !e.is_fatal()));
        assert!(outcome.failures.iter().any(|e| e.to_string().contains("timed out")));
        assert_eq!(fetcher.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn fetches_run_concurrently() {
        let fetcher = Arc::new(MapFetcher {
            delays: HashMap::from([("https://a/1.js", 150), ("https://a/2.js", 150), ("https://a/3.js", 150)]),
            calls: Mutex::new(Vec::new()),
        });
        let loader = ScriptLoader::new(fetcher, 2_000);
        let scripts: Vec<_> = (1..=3).map(|i| external(&format!("https://a/{}.js", i), i)).collect();

        let start = std::time::Instant::now();
        let outcome = loader.load(&scripts).await;
        assert_eq!(outcome.loaded.len(), 3);
        assert!(start.elapsed() < Duration::from_millis(400));
    }
}
