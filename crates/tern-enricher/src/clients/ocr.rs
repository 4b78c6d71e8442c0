//! OCR client.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "ocr";

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    text: String,
}

pub struct OcrClient {
    http: reqwest::Client,
    host: String,
    api_key: String,
    limiter: TokenBucket,
}

impl OcrClient {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                // Keepalive off so load spreads evenly across OCR instances.
                .pool_max_idle_per_host(0)
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            host: host.into(),
            api_key: api_key.into(),
            limiter: TokenBucket::new(100.0, 10),
        }
    }

    /// Extract text from an image; returns the raw response and the text.
    #[tracing::instrument(skip_all, fields(did = %did, cid = %cid, blob_size = image.len()))]
    pub async fn scan(&self, did: &str, cid: &str, image: &[u8]) -> Result<(Value, String)> {
        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.post(did, cid, image).await;
        observe_api(SERVICE, result.is_ok(), start);

        let raw = result?;
        let parsed: Response = serde_json::from_value(raw.clone())?;
        Ok((raw, parsed.text))
    }

    async fn post(&self, did: &str, cid: &str, image: &[u8]) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/api/analyze_blob", self.host))
            .query(&[("did", did), ("cid", cid)])
            .header("Content-Type", "image/jpeg")
            .bearer_auth(&self.api_key)
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
