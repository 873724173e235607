//! Cache keys and response snapshots.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;
use url::Url;
use wxalert_net::{Request, Response};

use crate::CacheError;

/// Normalized identity of a cacheable request.
///
/// The URL fragment is dropped; the method is always `GET`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Key for a `GET` of `url`.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET.to_string(),
            url: url.into(),
        }
    }

    /// Key for an outgoing request. Fails for anything but a retrieval request.
    pub fn for_request(request: &Request) -> Result<Self, CacheError> {
        if request.method != Method::GET {
            return Err(CacheError::NotRetrieval(request.method.to_string()));
        }
        Ok(Self::get(&request.url))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Immutable snapshot of a response, as stored in a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the snapshot is stored under.
    pub key: RequestKey,

    /// Final response URL (after redirects).
    pub url: Url,

    /// Response status.
    pub status: u16,

    /// Response headers, in original order.
    pub headers: Vec<(String, String)>,

    /// Response body, shared with every response rebuilt from this entry.
    #[serde(serialize_with = "encode_body", deserialize_with = "decode_body")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot `response` under `key`. Only successful responses may be stored.
    pub fn snapshot(key: RequestKey, response: &Response) -> Result<Self, CacheError> {
        if !response.ok() {
            return Err(CacheError::NotOk {
                url: key.url,
                status: response.status.as_u16(),
            });
        }

        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(Self {
            key,
            url: response.url.clone(),
            status: response.status.as_u16(),
            headers,
            body: response.body().clone(),
            cached_at: wxalert_common::now_millis(),
        })
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => trace!(header = %name, "Dropping unrepresentable cached header"),
            }
        }

        let mut response = Response::new(self.url.clone(), status, self.body.clone());
        response.headers = headers;
        response
    }

    /// Approximate stored size in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
            + self.url.as_str().len()
            + self.key.url.len()
            + self
                .headers
                .iter()
                .map(|(n, v)| n.len() + v.len())
                .sum::<usize>()
    }
}

fn encode_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(body))
}

fn decode_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_key_drops_fragment() {
        let a = RequestKey::get(&url("https://example.com/weather/#alerts"));
        let b = RequestKey::get(&url("https://example.com/weather/"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "GET https://example.com/weather/");
    }

    #[test]
    fn test_key_rejects_non_retrieval() {
        let request = Request::post(url("https://example.com/subscribe/"), "{}".into());
        assert!(matches!(
            RequestKey::for_request(&request),
            Err(CacheError::NotRetrieval(m)) if m == "POST"
        ));

        let head = Request::new(Method::HEAD, url("https://example.com/"));
        assert!(RequestKey::for_request(&head).is_err());
    }

    #[test]
    fn test_snapshot_rejects_error_status() {
        let response = Response::new(url("https://example.com/x"), StatusCode::NOT_FOUND, "gone");
        let key = RequestKey::get(&response.url);
        assert!(matches!(
            CacheEntry::snapshot(key, &response),
            Err(CacheError::NotOk { status: 404, .. })
        ));
    }

    #[test]
    fn test_snapshot_restores_response() {
        let response = Response::new(url("https://example.com/style.css"), StatusCode::OK, "body{}")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/css"));
        let entry = CacheEntry::snapshot(RequestKey::get(&response.url), &response).unwrap();

        let restored = entry.to_response();
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.content_type(), Some("text/css"));
        assert_eq!(restored.body(), response.body());
        assert!(entry.size() >= 6);
    }

    #[test]
    fn test_snapshot_shares_body_with_response() {
        let response = Response::new(url("https://example.com/radar.png"), StatusCode::OK, vec![7u8; 4096]);
        let entry = CacheEntry::snapshot(RequestKey::get(&response.url), &response).unwrap();

        assert_eq!(entry.body.as_ptr(), response.body().as_ptr());
        assert_eq!(entry.to_response().body().as_ptr(), response.body().as_ptr());
    }

    #[test]
    fn test_body_is_base64_on_disk() {
        let response = Response::new(url("https://example.com/"), StatusCode::OK, vec![0u8, 159, 255]);
        let entry = CacheEntry::snapshot(RequestKey::get(&response.url), &response).unwrap();

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"body\":\"AJ//\""));

        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
