//! Request interception policy.
//!
//! Every retrieval request from a controlled page is classified once:
//!
//! - **Navigation** (mode `navigate`, or `Accept` mentions `text/html`): network first.
//!   A successful response is stored in the current generation in the background and
//!   returned. On network failure the store is consulted, then the offline page.
//! - **Asset**: cache first. A hit never touches the network. A miss is fetched and,
//!   when configured, written through on a best-effort basis.
//!
//! Non-retrieval requests pass through untouched.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use wxalert_cache::{RequestKey, SharedCacheStorage};
use wxalert_net::{Fetcher, NetError, Request, RequestMode, Response};

use crate::{AgentConfig, AgentError, ExtendableEvent};

/// Media type marking a request for an HTML document.
const HTML_MEDIA_TYPE: &str = "text/html";

/// How a request is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Navigation,
    Asset,
}

/// Classify a request. Pure; evaluated once per intercepted request.
pub fn classify(request: &Request) -> RequestClass {
    let wants_html = request
        .accept()
        .is_some_and(|accept| accept.contains(HTML_MEDIA_TYPE));
    if request.mode == RequestMode::Navigate || wants_html {
        RequestClass::Navigation
    } else {
        RequestClass::Asset
    }
}

/// Where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineFallback,
}

/// Result of intercepting one request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the page performs the request itself.
    Passthrough,
    /// Respond with this response.
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// No response could be produced; the page sees a network error.
    Failed(NetError),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Respond { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Decides, per request, between network-first and cache-first.
#[derive(Clone)]
pub struct InterceptPolicy {
    config: Arc<AgentConfig>,
    caches: SharedCacheStorage,
    fetcher: Arc<dyn Fetcher>,
}

impl InterceptPolicy {
    pub fn new(config: Arc<AgentConfig>, caches: SharedCacheStorage, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            caches,
            fetcher,
        }
    }

    /// Handle one outgoing request. Background cache writes are registered on `event`.
    pub async fn handle(&self, request: &Request, event: &mut ExtendableEvent) -> FetchOutcome {
        let key = match RequestKey::for_request(request) {
            Ok(key) => key,
            Err(e) => {
                trace!(url = %request.url, reason = %e, "Passing through");
                return FetchOutcome::Passthrough;
            }
        };
        match classify(request) {
            RequestClass::Navigation => self.network_first(request, key, event).await,
            RequestClass::Asset => self.cache_first(request, key, event).await,
        }
    }

    async fn network_first(
        &self,
        request: &Request,
        key: RequestKey,
        event: &mut ExtendableEvent,
    ) -> FetchOutcome {
        let error = match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store_in_background(key, response.clone(), event);
                }
                return FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                };
            }
            Err(e) => e,
        };

        info!(url = %request.url, error = %error, "Network fetch failed, trying cache");

        let caches = self.caches.read().await;
        if let Some(entry) = caches.match_request(&key) {
            return FetchOutcome::Respond {
                response: entry.to_response(),
                source: ResponseSource::Cache,
            };
        }

        let offline = match self.config.offline_page() {
            Ok(url) => RequestKey::get(&url),
            Err(e) => {
                warn!(error = %e, "Offline page URL is invalid");
                return FetchOutcome::Failed(error);
            }
        };
        match caches.match_request(&offline) {
            Some(entry) => {
                debug!(url = %request.url, offline = %offline, "Serving offline page");
                FetchOutcome::Respond {
                    response: entry.to_response(),
                    source: ResponseSource::OfflineFallback,
                }
            }
            None => {
                warn!(url = %request.url, "Offline with no cached copy or offline page");
                FetchOutcome::Failed(error)
            }
        }
    }

    async fn cache_first(
        &self,
        request: &Request,
        key: RequestKey,
        event: &mut ExtendableEvent,
    ) -> FetchOutcome {
        let cached = self
            .caches
            .read()
            .await
            .match_request(&key)
            .map(|entry| entry.to_response());
        if let Some(response) = cached {
            trace!(url = %request.url, "Serving from cache");
            return FetchOutcome::Respond {
                response,
                source: ResponseSource::Cache,
            };
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if self.config.cache_assets_on_miss && response.ok() {
                    self.store_in_background(key, response.clone(), event);
                }
                FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Asset fetch failed with no cached copy");
                FetchOutcome::Failed(e)
            }
        }
    }

    /// Store `response` in the current generation without delaying the caller.
    ///
    /// Write failures are logged and swallowed.
    fn store_in_background(&self, key: RequestKey, response: Response, event: &mut ExtendableEvent) {
        let caches = Arc::clone(&self.caches);
        let cache_name = self.config.cache_name();
        event.wait_until(async move {
            let result = caches
                .write()
                .await
                .put(&cache_name, key.clone(), &response)
                .await;
            match result {
                Ok(()) => trace!(cache = %cache_name, key = %key, "Cached network response"),
                Err(e) => warn!(cache = %cache_name, key = %key, error = %e, "Cache write failed"),
            }
            Ok::<(), AgentError>(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::ACCEPT;
    use http::HeaderValue;
    use url::Url;
    use wxalert_cache::CacheStorage;
    use wxalert_net::StaticFetcher;

    const ORIGIN: &str = "https://wx.example.com";

    fn url(path: &str) -> Url {
        Url::parse(&format!("{ORIGIN}{path}")).unwrap()
    }

    fn policy(fetcher: Arc<StaticFetcher>, caches: SharedCacheStorage) -> InterceptPolicy {
        let config = AgentConfig::for_origin(url("/"));
        InterceptPolicy::new(Arc::new(config), caches, fetcher)
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&Request::navigate(url("/weather/"))), RequestClass::Navigation);

        let html_fetch = Request::get(url("/about/"))
            .header(ACCEPT, HeaderValue::from_static("text/html;q=0.9,*/*"));
        assert_eq!(classify(&html_fetch), RequestClass::Navigation);

        let navigate_without_accept = Request::get(url("/")).mode(RequestMode::Navigate);
        assert_eq!(classify(&navigate_without_accept), RequestClass::Navigation);

        let css = Request::get(url("/static/css/style.css"))
            .header(ACCEPT, HeaderValue::from_static("text/css,*/*;q=0.1"));
        assert_eq!(classify(&css), RequestClass::Asset);
        assert_eq!(classify(&Request::get(url("/api/alerts"))), RequestClass::Asset);
    }

    #[tokio::test]
    async fn test_non_retrieval_passes_through() {
        let fetcher = Arc::new(StaticFetcher::new());
        let caches = CacheStorage::in_memory().shared();
        let policy = policy(Arc::clone(&fetcher), Arc::clone(&caches));
        let mut event = ExtendableEvent::new();

        let post = Request::post(url("/subscriptions/save/"), "{}".into());
        assert!(matches!(policy.handle(&post, &mut event).await, FetchOutcome::Passthrough));
        let head = Request::new(http::Method::HEAD, url("/weather/"));
        assert!(matches!(policy.handle(&head, &mut event).await, FetchOutcome::Passthrough));
        assert_eq!(fetcher.total_hits().await, 0);
        assert!(caches.read().await.keys().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_success_is_returned_and_stored() {
        let fetcher = Arc::new(StaticFetcher::new().with_route(
            url("/weather/").as_str(),
            "text/html",
            "<h1>Alerts</h1>",
        ));
        let caches = CacheStorage::in_memory().shared();
        let policy = policy(fetcher, Arc::clone(&caches));
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::navigate(url("/weather/")), &mut event).await;
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        assert_eq!(outcome.response().unwrap().text().unwrap(), "<h1>Alerts</h1>");

        event.settled().await.unwrap();
        let caches = caches.read().await;
        let entry = caches
            .match_in("weather-app-cache-v2.1", &RequestKey::get(&url("/weather/")))
            .unwrap();
        assert_eq!(&entry.body[..], b"<h1>Alerts</h1>");
    }

    #[tokio::test]
    async fn test_navigation_error_status_is_returned_not_stored() {
        let fetcher = Arc::new(StaticFetcher::new());
        let caches = CacheStorage::in_memory().shared();
        let policy = policy(fetcher, Arc::clone(&caches));
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::navigate(url("/missing/")), &mut event).await;
        assert_eq!(outcome.response().unwrap().status.as_u16(), 404);
        event.settled().await.unwrap();
        assert!(caches.read().await.keys().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_offline_falls_back_to_offline_page() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.set_offline(true);
        let caches = CacheStorage::in_memory().shared();
        let offline = url("/offline/");
        caches
            .write()
            .await
            .put(
                "weather-app-cache-v2.1",
                RequestKey::get(&offline),
                &Response::new(offline.clone(), http::StatusCode::OK, "offline"),
            )
            .await
            .unwrap();
        let policy = policy(fetcher, caches);
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::navigate(url("/weather/radar/")), &mut event).await;
        assert_eq!(outcome.source(), Some(ResponseSource::OfflineFallback));
        assert_eq!(outcome.response().unwrap().text().unwrap(), "offline");
    }

    #[tokio::test]
    async fn test_navigation_offline_without_anything_fails() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.set_offline(true);
        let policy = policy(fetcher, CacheStorage::in_memory().shared());
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::navigate(url("/")), &mut event).await;
        assert!(matches!(outcome, FetchOutcome::Failed(NetError::Offline(_))));
    }

    #[tokio::test]
    async fn test_asset_hit_never_touches_network() {
        let css = url("/static/css/style.css");
        let fetcher = Arc::new(StaticFetcher::new().with_route(css.as_str(), "text/css", "fresh"));
        let caches = CacheStorage::in_memory().shared();
        caches
            .write()
            .await
            .put(
                "weather-app-cache-v2.1",
                RequestKey::get(&css),
                &Response::new(css.clone(), http::StatusCode::OK, "cached"),
            )
            .await
            .unwrap();
        let policy = policy(Arc::clone(&fetcher), caches);
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::get(css.clone()), &mut event).await;
        assert_eq!(outcome.source(), Some(ResponseSource::Cache));
        assert_eq!(outcome.response().unwrap().text().unwrap(), "cached");
        assert_eq!(fetcher.hits(css.as_str()).await, 0);
    }

    #[tokio::test]
    async fn test_asset_miss_fetches_without_storing_by_default() {
        let js = url("/static/js/alert_map.js");
        let fetcher = Arc::new(StaticFetcher::new().with_route(js.as_str(), "text/javascript", "map()"));
        let caches = CacheStorage::in_memory().shared();
        let policy = policy(fetcher, Arc::clone(&caches));
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::get(js), &mut event).await;
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        event.settled().await.unwrap();
        assert!(caches.read().await.keys().is_empty());
    }

    #[tokio::test]
    async fn test_asset_write_through_failure_still_delivers() {
        let js = url("/static/js/alert_map.js");
        let fetcher = Arc::new(StaticFetcher::new().with_route(js.as_str(), "text/javascript", "map()"));
        let caches = CacheStorage::in_memory().with_quota(8).shared();
        let config = AgentConfig {
            cache_assets_on_miss: true,
            ..AgentConfig::for_origin(url("/"))
        };
        let policy = InterceptPolicy::new(Arc::new(config), Arc::clone(&caches), fetcher);
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::get(js.clone()), &mut event).await;
        assert_eq!(outcome.response().unwrap().text().unwrap(), "map()");
        event.settled().await.unwrap();
        assert!(caches.read().await.match_request(&RequestKey::get(&js)).is_none());
    }

    #[tokio::test]
    async fn test_asset_miss_offline_fails() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.set_offline(true);
        let policy = policy(fetcher, CacheStorage::in_memory().shared());
        let mut event = ExtendableEvent::new();

        let outcome = policy.handle(&Request::get(url("/static/img/radar.png")), &mut event).await;
        assert!(matches!(outcome, FetchOutcome::Failed(_)));
    }
}
