//! Prescreen classifier client.
//!
//! A cheap first-pass classifier. When it returns `sfw` the heavy classifier
//! is suppressed for that image.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "prescreen";

#[derive(Debug, Deserialize)]
struct Response {
    result: String,
}

pub struct PrescreenClient {
    http: reqwest::Client,
    host: String,
    limiter: TokenBucket,
}

impl PrescreenClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            host: host.into(),
            limiter: TokenBucket::new(100.0, 10),
        }
    }

    /// Classify an image; returns the raw response and the decided class.
    #[tracing::instrument(skip_all, fields(did = %did, blob_size = image.len()))]
    pub async fn scan(&self, did: &str, image: &[u8]) -> Result<(Value, String)> {
        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.post(image).await;
        observe_api(SERVICE, result.is_ok(), start);

        let raw = result?;
        let parsed: Response = serde_json::from_value(raw.clone())?;
        Ok((raw, parsed.result))
    }

    async fn post(&self, image: &[u8]) -> Result<Value> {
        let part = reqwest::multipart::Part::bytes(image.to_vec()).file_name("image.jpg");
        let form = reqwest::multipart::Form::new().part("media", part);

        let response = self
            .http
            .post(format!("{}/predict", self.host))
            .multipart(form)
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
