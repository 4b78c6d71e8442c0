//! Abuse-match client.
//!
//! Scans image bytes against known-abuse hash corpora. A hit whose label is
//! in the abusive set marks the image as a match.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, observe_api};
use crate::error::{Error, Result};

const SERVICE: &str = "abuse";

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(rename = "match")]
    match_result: Option<MatchResult>,
}

#[derive(Debug, Deserialize)]
struct MatchResult {
    #[serde(default)]
    hits: Vec<MatchHit>,
}

#[derive(Debug, Deserialize)]
struct MatchHit {
    #[serde(default)]
    label: String,
}

impl MatchResult {
    fn is_abuse_match(&self) -> bool {
        self.hits
            .iter()
            .any(|hit| hit.label == "csam" || hit.label == "csem")
    }
}

pub struct AbuseClient {
    http: reqwest::Client,
    host: String,
    password: String,
    limiter: TokenBucket,
}

impl AbuseClient {
    pub fn new(host: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            host: host.into(),
            password: password.into(),
            limiter: TokenBucket::new(100.0, 10),
        }
    }

    /// Scan an image; returns the raw response and whether it is an abuse match.
    #[tracing::instrument(skip_all, fields(did = %did, blob_size = image.len()))]
    pub async fn scan(&self, did: &str, image: &[u8]) -> Result<(Value, bool)> {
        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.post(did, image).await;
        observe_api(SERVICE, result.is_ok(), start);

        let raw = result?;
        let parsed: Response = serde_json::from_value(raw.clone())?;
        let is_match = parsed
            .match_result
            .map(|m| m.is_abuse_match())
            .unwrap_or(false);

        Ok((raw, is_match))
    }

    async fn post(&self, did: &str, image: &[u8]) -> Result<Value> {
        let response = self
            .http
            .post(format!(
                "{}/xrpc/com.atproto.unspecced.scanBlob",
                self.host
            ))
            .query(&[("did", did)])
            .basic_auth("admin", Some(&self.password))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abusive_labels_are_matches() {
        let m = MatchResult {
            hits: vec![
                MatchHit {
                    label: "benign".to_string(),
                },
                MatchHit {
                    label: "csam".to_string(),
                },
            ],
        };
        assert!(m.is_abuse_match());
    }

    #[test]
    fn other_labels_are_not_matches() {
        let m = MatchResult {
            hits: vec![MatchHit {
                label: "spam".to_string(),
            }],
        };
        assert!(!m.is_abuse_match());

        let empty = MatchResult { hits: vec![] };
        assert!(!empty.is_abuse_match());
    }
}
