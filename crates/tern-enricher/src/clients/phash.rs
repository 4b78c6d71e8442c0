//! Perceptual-hash client.
//!
//! Returns a 256-bit perceptual hash as hex; hashes below the service's
//! quality floor come back with `qualityTooLow` set instead.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "phash";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashResponse {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub quality_too_low: bool,
}

pub struct PhashClient {
    http: reqwest::Client,
    host: String,
    limiter: TokenBucket,
}

impl PhashClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                // Keepalive off so load spreads evenly across hasher instances.
                .pool_max_idle_per_host(0)
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            host: host.into(),
            limiter: TokenBucket::new(100.0, 10),
        }
    }

    /// Hash an image; returns the raw response and the parsed hash.
    #[tracing::instrument(skip_all, fields(did = %did, cid = %cid, blob_size = image.len()))]
    pub async fn hash(&self, did: &str, cid: &str, image: &[u8]) -> Result<(Value, HashResponse)> {
        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.post(image).await;
        observe_api(SERVICE, result.is_ok(), start);

        let raw = result?;
        let parsed: HashResponse = serde_json::from_value(raw.clone())?;
        Ok((raw, parsed))
    }

    async fn post(&self, image: &[u8]) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/api/hash_blob", self.host))
            .header("Content-Type", "image/jpeg")
            .body(image.to_vec())
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
