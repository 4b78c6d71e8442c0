//! Appview profile client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, cache_result, cache_size, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "profile";

/// Fetches detailed profile views from the appview.
///
/// Uncached by default: profile views are short-lived and rules care about
/// fresh follower counts. Pass a non-zero cache size to enable caching.
pub struct ProfileClient {
    http: reqwest::Client,
    host: String,
    ratelimit_bypass: Option<String>,
    limiter: TokenBucket,
    cache: Option<moka::sync::Cache<String, Arc<Value>>>,
}

impl ProfileClient {
    pub fn new(
        host: impl Into<String>,
        ratelimit_bypass: Option<String>,
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
            ratelimit_bypass,
            limiter: TokenBucket::new(500.0, 100),
            cache,
        }
    }

    /// Fetch the profile view for a DID.
    #[tracing::instrument(skip_all, fields(did = %did))]
    pub async fn get_profile(&self, did: &str) -> Result<Arc<Value>> {
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

        let profile = Arc::new(result?);
        if let Some(cache) = &self.cache {
            cache.insert(did.to_string(), Arc::clone(&profile));
            cache_size(SERVICE, cache);
        }
        Ok(profile)
    }

    async fn fetch(&self, did: &str) -> Result<Value> {
        let url = format!("{}/xrpc/app.bsky.actor.getProfile", self.host);
        let mut request = self.http.get(&url).query(&[("actor", did)]);
        if let Some(bypass) = &self.ratelimit_bypass {
            request = request.header("x-ratelimit-bypass", bypass);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                service: SERVICE,
                status: response.status(),
            });
        }

        Ok(response.json().await?)
    }
}
