//! Image CDN client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tern_core::TokenBucket;

use super::{USER_AGENT, cache_result, cache_size, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "cdn";

/// Downloads image bytes from the CDN, keyed by subject DID + blob CID.
pub struct CdnClient {
    http: reqwest::Client,
    host: String,
    limiter: TokenBucket,
    cache: Option<moka::sync::Cache<String, Arc<Vec<u8>>>>,
}

impl CdnClient {
    pub fn new(host: impl Into<String>, cache_capacity: u64, cache_ttl: Duration) -> Self {
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
            limiter: TokenBucket::new(100.0, 50),
            cache,
        }
    }

    /// Download a feed-thumbnail rendition of the blob.
    #[tracing::instrument(skip_all, fields(did = %did, cid = %cid))]
    pub async fn get_image_bytes(&self, did: &str, cid: &str) -> Result<Arc<Vec<u8>>> {
        let cache_key = format!("{}/{}", did, cid);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&cache_key) {
                cache_result(SERVICE, "hit");
                return Ok(hit);
            }
            cache_result(SERVICE, "miss");
        }

        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.fetch(did, cid).await;
        observe_api(SERVICE, result.is_ok(), start);

        let bytes = Arc::new(result?);
        if let Some(cache) = &self.cache {
            cache.insert(cache_key, Arc::clone(&bytes));
            cache_size(SERVICE, cache);
        }
        Ok(bytes)
    }

    async fn fetch(&self, did: &str, cid: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/img/feed_thumbnail/plain/{}/{}@jpeg",
            self.host, did, cid
        );
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                service: SERVICE,
                status: response.status(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
