//! Moderation-repo view client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, cache_result, cache_size, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "mod_repo";

/// Fetches the moderation console's detailed repo view for a subject.
///
/// Repo views are stable enough to cache briefly; the enricher configures
/// 50 000 entries with a one minute TTL.
pub struct ModRepoClient {
    http: reqwest::Client,
    host: String,
    admin_token: String,
    limiter: TokenBucket,
    cache: Option<moka::sync::Cache<String, Arc<Value>>>,
}

impl ModRepoClient {
    pub fn new(
        host: impl Into<String>,
        admin_token: impl Into<String>,
        cache_capacity: u64,
        cache_ttl: Duration,
    ) -> Self {
        let cache = (cache_capacity > 0).then(|| {
            moka::sync::Cache::builder()
                .max_capacity(cache_capacity)
                .time_to_live(cache_ttl)
                .build()
        });

        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            host: host.into(),
            admin_token: admin_token.into(),
            limiter: TokenBucket::new(100.0, 10),
            cache,
        }
    }

    /// Fetch the repo view for a DID.
    #[tracing::instrument(skip_all, fields(did = %did))]
    pub async fn get_repo_view(&self, did: &str) -> Result<Arc<Value>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(did) {
                cache_result(SERVICE, "hit");
                return Ok(hit);
            }
            cache_result(SERVICE, "miss");
        }

        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.fetch(did).await;
        observe_api(SERVICE, result.is_ok(), start);

        let view = Arc::new(result?);
        if let Some(cache) = &self.cache {
            cache.insert(did.to_string(), Arc::clone(&view));
            cache_size(SERVICE, cache);
        }
        Ok(view)
    }

    async fn fetch(&self, did: &str) -> Result<Value> {
        let url = format!("{}/xrpc/tools.ozone.moderation.getRepo", self.host);
        let response = self
            .http
            .get(&url)
            .query(&[("did", did)])
            .basic_auth("admin", Some(&self.admin_token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                service: SERVICE,
                status: response.status(),
            });
        }

        Ok(response.json().await?)
    }
}
