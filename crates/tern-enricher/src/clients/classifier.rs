//! Heavy image classifier client.
//!
//! Returns a flat class -> score map flattened from the provider's nested
//! response shape.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "classifier";

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    status: Vec<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    response: Inner,
}

#[derive(Debug, Deserialize)]
struct Inner {
    #[serde(default)]
    output: Vec<Output>,
}

#[derive(Debug, Deserialize)]
struct Output {
    #[serde(default)]
    classes: Vec<Class>,
}

#[derive(Debug, Deserialize)]
struct Class {
    class: String,
    score: f64,
}

pub struct ClassifierClient {
    http: reqwest::Client,
    endpoint: String,
    api_token: String,
    limiter: TokenBucket,
}

impl ClassifierClient {
    pub fn new(endpoint: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            endpoint: endpoint.into(),
            api_token: api_token.into(),
            limiter: TokenBucket::new(100.0, 10),
        }
    }

    /// Classify an image; returns the raw response and a class -> score map.
    #[tracing::instrument(skip_all, fields(image_size = image.len()))]
    pub async fn scan(&self, image: &[u8]) -> Result<(Value, HashMap<String, f64>)> {
        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.post(image).await;
        observe_api(SERVICE, result.is_ok(), start);

        let raw = result?;
        let parsed: Response = serde_json::from_value(raw.clone())?;

        let mut classes = HashMap::new();
        for status in parsed.status {
            for output in status.response.output {
                for class in output.classes {
                    classes.insert(class.class, class.score);
                }
            }
        }

        Ok((raw, classes))
    }

    async fn post(&self, image: &[u8]) -> Result<Value> {
        let part = reqwest::multipart::Part::bytes(image.to_vec()).file_name("image.jpg");
        let form = reqwest::multipart::Form::new().part("media", part);

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Token {}", self.api_token))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scores_flatten_to_a_class_map() {
        let raw = serde_json::json!({
            "status": [{
                "response": {
                    "output": [{
                        "time": 0.2,
                        "classes": [
                            {"class": "general_nsfw", "score": 0.97},
                            {"class": "general_suggestive", "score": 0.41}
                        ]
                    }]
                }
            }]
        });

        let parsed: Response = serde_json::from_value(raw).unwrap();
        let mut classes = HashMap::new();
        for status in parsed.status {
            for output in status.response.output {
                for class in output.classes {
                    classes.insert(class.class, class.score);
                }
            }
        }

        assert_eq!(classes.len(), 2);
        assert_eq!(classes["general_nsfw"], 0.97);
    }
}
