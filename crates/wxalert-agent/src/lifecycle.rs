//! Install and activation of cache generations.
//!
//! ```text
//! Parsed ──install──▶ Installing ──▶ Installed ──activate──▶ Activating ──▶ Activated
//!                          │
//!                          └── any manifest fetch fails ──▶ Redundant
//! ```
//!
//! There is no way back. A new agent version starts over with a new generation name.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;
use wxalert_cache::{RequestKey, SharedCacheStorage};
use wxalert_net::{Fetcher, Request, Response};

use crate::{AgentConfig, AgentError};

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentState {
    /// Loaded, not yet installed.
    #[default]
    Parsed,
    /// Install event running (precaching).
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activate event running (purging stale generations).
    Activating,
    /// Active and intercepting requests.
    Activated,
    /// Install failed or replaced.
    Redundant,
}

impl AgentState {
    pub fn is_active(&self) -> bool {
        *self == AgentState::Activated
    }
}

/// Outcome of a completed activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale generations deleted, oldest first.
    pub deleted: Vec<String>,
    /// Clients newly brought under control.
    pub claimed: usize,
}

/// Prepares and migrates the agent's cache generations.
#[derive(Clone)]
pub struct CacheLifecycle {
    config: Arc<AgentConfig>,
    caches: SharedCacheStorage,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheLifecycle {
    pub fn new(config: Arc<AgentConfig>, caches: SharedCacheStorage, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            caches,
            fetcher,
        }
    }

    /// Fetch every manifest asset and store them all in the current generation.
    ///
    /// All or nothing: if any fetch fails or returns a non-ok status, nothing is stored
    /// and the generation is not created.
    pub async fn precache(&self) -> Result<usize, AgentError> {
        let cache_name = self.config.cache_name();
        let urls = self.config.manifest_urls()?;
        info!(cache = %cache_name, assets = urls.len(), "Precaching app shell");

        let batch = try_join_all(urls.into_iter().map(|url| self.fetch_asset(url))).await;
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                error!(cache = %cache_name, error = %e, "Failed to precache app shell");
                return Err(e);
            }
        };

        let stored = self.caches.write().await.put_all(&cache_name, batch).await?;
        info!(cache = %cache_name, entries = stored, "App shell cached");
        Ok(stored)
    }

    async fn fetch_asset(&self, url: Url) -> Result<(RequestKey, Response), AgentError> {
        let request = Request::get(url.clone());
        match self.fetcher.fetch(&request).await {
            Ok(response) if response.ok() => Ok((RequestKey::get(&url), response)),
            Ok(response) => Err(AgentError::InstallFailed {
                url: url.to_string(),
                reason: format!("status {}", response.status),
            }),
            Err(e) => Err(AgentError::InstallFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Delete every generation owned by this agent except the current one.
    ///
    /// Idempotent. A generation that fails to delete is logged and skipped.
    pub async fn purge_stale(&self) -> Vec<String> {
        let current = self.config.cache_name();
        let mut caches = self.caches.write().await;

        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| self.config.owns_cache(name) && *name != current)
            .map(str::to_string)
            .collect();

        let mut deleted = Vec::with_capacity(stale.len());
        for name in stale {
            match caches.delete(&name).await {
                Ok(_) => {
                    info!(cache = %name, "Deleted old cache");
                    deleted.push(name);
                }
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
            }
        }

        debug!(current = %current, deleted = deleted.len(), "Stale generations purged");
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxalert_cache::CacheStorage;
    use wxalert_net::StaticFetcher;

    fn config(manifest: &[&str]) -> Arc<AgentConfig> {
        Arc::new(AgentConfig {
            manifest: manifest.iter().map(|s| s.to_string()).collect(),
            ..AgentConfig::for_origin(Url::parse("https://wx.example.com/").unwrap())
        })
    }

    fn shell_fetcher() -> StaticFetcher {
        StaticFetcher::new()
            .with_route("https://wx.example.com/", "text/html", "home")
            .with_route("https://wx.example.com/static/css/style.css", "text/css", "body{}")
    }

    #[tokio::test]
    async fn test_precache_stores_every_asset() {
        let caches = CacheStorage::in_memory().shared();
        let lifecycle = CacheLifecycle::new(
            config(&["/", "/static/css/style.css"]),
            Arc::clone(&caches),
            Arc::new(shell_fetcher()),
        );

        assert_eq!(lifecycle.precache().await.unwrap(), 2);
        assert_eq!(caches.read().await.get("weather-app-cache-v2.1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_precache_reports_stored_entries_for_repeated_urls() {
        let caches = CacheStorage::in_memory().shared();
        let lifecycle = CacheLifecycle::new(config(&["/", "/"]), Arc::clone(&caches), Arc::new(shell_fetcher()));

        assert_eq!(lifecycle.precache().await.unwrap(), 1);
        assert_eq!(caches.read().await.get("weather-app-cache-v2.1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_precache_unreachable_asset_creates_nothing() {
        let caches = CacheStorage::in_memory().shared();
        let fetcher = shell_fetcher().with_failure("https://unpkg.com/leaflet@1.9.4/dist/leaflet.js");
        let lifecycle = CacheLifecycle::new(
            config(&["/", "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js", "/static/css/style.css"]),
            Arc::clone(&caches),
            Arc::new(fetcher),
        );

        let err = lifecycle.precache().await.unwrap_err();
        assert!(matches!(err, AgentError::InstallFailed { ref url, .. } if url.contains("leaflet.js")));
        assert!(caches.read().await.keys().is_empty());
    }

    #[tokio::test]
    async fn test_precache_error_status_creates_nothing() {
        let caches = CacheStorage::in_memory().shared();
        let lifecycle = CacheLifecycle::new(
            config(&["/", "/offline/"]),
            Arc::clone(&caches),
            Arc::new(shell_fetcher()),
        );

        let err = lifecycle.precache().await.unwrap_err();
        assert!(err.to_string().contains("status 404"));
        assert!(!caches.read().await.has("weather-app-cache-v2.1"));
    }

    #[tokio::test]
    async fn test_purge_keeps_current_and_foreign_caches() {
        let mut storage = CacheStorage::in_memory();
        for name in [
            "weather-app-cache-v1",
            "weather-app-cache-v2.0",
            "weather-app-cache-v2.1",
            "leaflet-tiles",
        ] {
            storage.open(name).await.unwrap();
        }
        let caches = storage.shared();
        let lifecycle = CacheLifecycle::new(config(&[]), Arc::clone(&caches), Arc::new(StaticFetcher::new()));

        assert_eq!(
            lifecycle.purge_stale().await,
            vec!["weather-app-cache-v1".to_string(), "weather-app-cache-v2.0".to_string()]
        );
        assert_eq!(
            caches.read().await.keys(),
            vec!["weather-app-cache-v2.1", "leaflet-tiles"]
        );

        assert!(lifecycle.purge_stale().await.is_empty());
        assert_eq!(caches.read().await.keys().len(), 2);
    }

    #[test]
    fn test_state_default_and_active() {
        assert_eq!(AgentState::default(), AgentState::Parsed);
        assert!(AgentState::Activated.is_active());
        assert!(!AgentState::Installed.is_active());
    }
}
