//! Agent configuration.
//!
//! Everything the agent needs to know about its deployment is passed in here at
//! construction: the cache generation identifier, the asset manifest, the offline
//! route and the notification baseline.

use std::path::Path;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AgentError;

/// Baseline fields of every notification shown for a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub sound: Option<String>,
    /// Navigation target opened when the notification is clicked.
    pub url: String,
    /// Vibration pattern in milliseconds (on, off, on, ...).
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Weather Alert".to_string(),
            body: "New alert received!".to_string(),
            icon: "/static/images/icons/Icon_192.jpg".to_string(),
            badge: "/static/images/icons/Icon_72.jpg".to_string(),
            sound: None,
            url: "/".to_string(),
            vibrate: vec![200, 100, 200, 100, 200],
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Prefix shared by every cache generation this agent owns.
    pub cache_prefix: String,

    /// Version suffix. Changing it migrates to a new generation on next activation.
    pub cache_version: String,

    /// Origin relative URLs are resolved against.
    pub origin: Url,

    /// Assets fetched and stored at install time, in order.
    pub manifest: Vec<String>,

    /// Page served for failed navigations with no cached copy.
    pub offline_url: String,

    /// Store asset responses fetched on a cache miss.
    pub cache_assets_on_miss: bool,

    /// Notification baseline.
    pub notification: NotificationDefaults,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "weather-app-cache-".to_string(),
            cache_version: "v2.1".to_string(),
            origin: Url::parse("http://localhost:8000/").expect("default origin is valid"),
            manifest: [
                "/",
                "/about/",
                "/weather/",
                "/static/css/style.css",
                "/static/js/main.js",
                "/static/images/icons/Icon_192.jpg",
                "/static/images/icons/Icon_512.jpg",
                "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css",
                "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/js/bootstrap.bundle.min.js",
                "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
                "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
                "/offline/",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline_url: "/offline/".to_string(),
            cache_assets_on_miss: false,
            notification: NotificationDefaults::default(),
        }
    }
}

impl AgentConfig {
    /// Configuration for `origin` with every other field at its default.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, AgentError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Name of the current cache generation.
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.cache_prefix, self.cache_version)
    }

    /// Whether `name` is one of this agent's generations (current or stale).
    pub fn owns_cache(&self, name: &str) -> bool {
        name.starts_with(&self.cache_prefix)
    }

    /// Resolve a relative or absolute URL against the origin.
    pub fn resolve(&self, url: &str) -> Result<Url, AgentError> {
        self.origin.join(url).map_err(|e| AgentError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// The manifest, resolved.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, AgentError> {
        self.manifest.iter().map(|u| self.resolve(u)).collect()
    }

    /// The offline fallback page, resolved.
    pub fn offline_page(&self) -> Result<Url, AgentError> {
        self.resolve(&self.offline_url)
    }

    /// Check the configuration for values the agent can't run with.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.cache_prefix.is_empty() {
            return Err(AgentError::Config("cache_prefix must not be empty".into()));
        }
        if self.cache_version.is_empty() {
            return Err(AgentError::Config("cache_version must not be empty".into()));
        }
        if self.origin.cannot_be_a_base() {
            return Err(AgentError::Config(format!(
                "origin {} cannot resolve relative URLs",
                self.origin
            )));
        }
        let mut seen = HashSet::new();
        for mut url in self.manifest_urls()? {
            url.set_fragment(None);
            if !seen.insert(url.to_string()) {
                return Err(AgentError::Config(format!("manifest lists {url} more than once")));
            }
        }
        self.offline_page()?;
        Ok(())
    }
}
