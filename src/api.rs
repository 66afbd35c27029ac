use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{NotepadError, Result};
use crate::storage::LocalStore;
use crate::util::now_unix;

const API_KEY_HEADER: &str = "X-Api-Key";

/// Reference data (item names, categories) barely changes.
pub const REFERENCE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Profile and inventory go stale quickly.
pub const PROFILE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedResponse {
    fetched_at: i64,
    body: Value,
}

impl CachedResponse {
    fn is_fresh(&self, now: i64, ttl: Duration) -> bool {
        let age = now - self.fetched_at;
        age >= 0 && (age as u64) < ttl.as_secs()
    }
}

/// Client for the site's authenticated JSON API, with responses kept in the
/// local store for a caller-chosen time.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    store: LocalStore,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, store: LocalStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            store,
        }
    }

    pub async fn user(&self) -> Result<Value> {
        self.get_cached("user", PROFILE_TTL).await
    }

    pub async fn inventory(&self) -> Result<Value> {
        self.get_cached("user/inventory", PROFILE_TTL).await
    }

    pub async fn reference(&self, name: &str) -> Result<Value> {
        self.get_cached(&format!("data/{name}"), REFERENCE_TTL).await
    }

    /// GET `path`, answering from the local cache while it is younger than `ttl`.
    pub async fn get_cached(&self, path: &str, ttl: Duration) -> Result<Value> {
        let key = cache_key(path);
        if let Some(cached) = self.store.get_json::<CachedResponse>(&key) {
            if cached.is_fresh(now_unix(), ttl) {
                tracing::debug!(path, "api response from local cache");
                return Ok(cached.body);
            }
        }

        let body = self.fetch(path).await?;
        self.store.set_json(
            &key,
            &CachedResponse {
                fetched_at: now_unix(),
                body: body.clone(),
            },
        )?;
        Ok(body)
    }

    /// Forget the cached response for `path`.
    pub fn invalidate(&self, path: &str) -> Result<()> {
        self.store.remove(&cache_key(path))
    }

    async fn fetch(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        tracing::debug!(%url, "api request");

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(NotepadError::Remote(format!(
                "API request {path} failed (HTTP {status}): {}",
                reason.trim()
            )));
        }

        Ok(response.json().await?)
    }
}

fn cache_key(path: &str) -> String {
    format!("api-cache.{}", path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_freshness_window() {
        let entry = CachedResponse {
            fetched_at: 1_000,
            body: Value::Null,
        };
        let ttl = Duration::from_secs(60);
        assert!(entry.is_fresh(1_000, ttl));
        assert!(entry.is_fresh(1_059, ttl));
        assert!(!entry.is_fresh(1_060, ttl));
        // Clock went backwards: refetch.
        assert!(!entry.is_fresh(999, ttl));
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_network() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::open(tmp.path(), "1001").unwrap();
        store
            .set_json(
                &cache_key("/data/items"),
                &CachedResponse {
                    fetched_at: now_unix(),
                    body: json!({"items": [1, 2]}),
                },
            )
            .unwrap();

        // Nothing listens on the discard port; a network call would fail.
        let api = ApiClient::new("http://127.0.0.1:9", "secret", store);
        let body = api.reference("items").await.unwrap();
        assert_eq!(body, json!({"items": [1, 2]}));
    }

    #[tokio::test]
    async fn test_stale_cache_goes_to_network() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::open(tmp.path(), "1001").unwrap();
        store
            .set_json(
                &cache_key("user"),
                &CachedResponse {
                    fetched_at: 0,
                    body: json!({"name": "old"}),
                },
            )
            .unwrap();

        let api = ApiClient::new("http://127.0.0.1:9", "secret", store.clone());
        assert!(api.user().await.is_err());

        api.invalidate("user").unwrap();
        assert!(store.get(&cache_key("user")).is_none());
    }
}
