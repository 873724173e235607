//! In-memory fetcher serving a fixed route table.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use hashbrown::{HashMap, HashSet};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use tokio::sync::Mutex;
use tracing::trace;
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

/// Fetcher answering from a fixed set of routes.
///
/// Unknown URLs get a `404`. URLs registered with [`StaticFetcher::with_failure`] and every
/// URL while the fetcher is offline fail with [`NetError::Offline`].
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: HashMap<String, Response>,
    failing: HashSet<String>,
    offline: AtomicBool,
    hits: Mutex<HashMap<String, usize>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`.
    pub fn with_route(self, url: &str, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return self,
        };
        let response = Response::new(parsed, StatusCode::OK, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.with_response(response)
    }

    /// Serve a prepared response at its own URL.
    pub fn with_response(mut self, response: Response) -> Self {
        self.routes.insert(route_key(&response.url), response);
        self
    }

    /// Make every fetch of `url` fail as if the host were unreachable.
    pub fn with_failure(mut self, url: &str) -> Self {
        if let Ok(parsed) = Url::parse(url) {
            self.failing.insert(route_key(&parsed));
        }
        self
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Number of fetches attempted for `url`, including failed ones.
    pub async fn hits(&self, url: &str) -> usize {
        let key = match Url::parse(url) {
            Ok(u) => route_key(&u),
            Err(_) => return 0,
        };
        self.hits.lock().await.get(&key).copied().unwrap_or(0)
    }

    /// Total fetches attempted.
    pub async fn total_hits(&self) -> usize {
        self.hits.lock().await.values().sum()
    }

    async fn serve(&self, request: &Request) -> Result<Response, NetError> {
        let key = route_key(&request.url);
        *self.hits.lock().await.entry(key.clone()).or_insert(0) += 1;

        if self.is_offline() || self.failing.contains(&key) {
            trace!(url = %request.url, "Static route unreachable");
            return Err(NetError::Offline(request.url.to_string()));
        }

        Ok(self
            .routes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::new(request.url.clone(), StatusCode::NOT_FOUND, Bytes::new())))
    }
}

impl Fetcher for StaticFetcher {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>> {
        self.serve(request).boxed()
    }
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}
