//! Decentralized-identity resolution client.
//!
//! Resolves DID documents (`did:plc` via the PLC directory, `did:web` via
//! the well-known document) and fetches PLC audit logs, which carry the
//! account creation time rules frequently key on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tern_core::TokenBucket;

use super::{USER_AGENT, cache_result, cache_size, observe_api};
use crate::error::{Error, Result};

const DOC_SERVICE: &str = "did_doc";
const AUDIT_SERVICE: &str = "did_audit";

/// Identity resolver with separate caches for documents and audit logs.
pub struct DidClient {
    http: reqwest::Client,
    plc_host: String,
    limiter: TokenBucket,
    doc_cache: Option<moka::sync::Cache<String, Arc<Value>>>,
    audit_cache: Option<moka::sync::Cache<String, Arc<Value>>>,
}

impl DidClient {
    pub fn new(
        plc_host: impl Into<String>,
        doc_cache_capacity: u64,
        doc_cache_ttl: Duration,
        audit_cache_capacity: u64,
        audit_cache_ttl: Duration,
    ) -> Self {
        let doc_cache = (doc_cache_capacity > 0).then(|| {
            moka::sync::Cache::builder()
                .max_capacity(doc_cache_capacity)
                .time_to_live(doc_cache_ttl)
                .build()
        });
        let audit_cache = (audit_cache_capacity > 0).then(|| {
            moka::sync::Cache::builder()
                .max_capacity(audit_cache_capacity)
                .time_to_live(audit_cache_ttl)
                .build()
        });

        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            plc_host: plc_host.into(),
            limiter: TokenBucket::new(200.0, 100),
            doc_cache,
            audit_cache,
        }
    }

    /// Resolve a DID document.
    #[tracing::instrument(skip_all, fields(did = %did))]
    pub async fn get_did_doc(&self, did: &str) -> Result<Arc<Value>> {
        if let Some(cache) = &self.doc_cache {
            if let Some(hit) = cache.get(did) {
                cache_result(DOC_SERVICE, "hit");
                return Ok(hit);
            }
            cache_result(DOC_SERVICE, "miss");
        }

        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.fetch_doc(did).await;
        observe_api(DOC_SERVICE, result.is_ok(), start);

        let doc = Arc::new(result?);
        if let Some(cache) = &self.doc_cache {
            cache.insert(did.to_string(), Arc::clone(&doc));
            cache_size(DOC_SERVICE, cache);
        }
        Ok(doc)
    }

    /// Fetch the PLC audit log for a `did:plc:` identifier.
    #[tracing::instrument(skip_all, fields(did = %did))]
    pub async fn get_audit_log(&self, did: &str) -> Result<Arc<Value>> {
        if let Some(cache) = &self.audit_cache {
            if let Some(hit) = cache.get(did) {
                cache_result(AUDIT_SERVICE, "hit");
                return Ok(hit);
            }
            cache_result(AUDIT_SERVICE, "miss");
        }

        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.fetch_audit_log(did).await;
        observe_api(AUDIT_SERVICE, result.is_ok(), start);

        let log = Arc::new(result?);
        if let Some(cache) = &self.audit_cache {
            cache.insert(did.to_string(), Arc::clone(&log));
            cache_size(AUDIT_SERVICE, cache);
        }
        Ok(log)
    }

    async fn fetch_doc(&self, did: &str) -> Result<Value> {
        let url = doc_url(&self.plc_host, did)?;
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                service: DOC_SERVICE,
                status: response.status(),
            });
        }

        Ok(response.json().await?)
    }

    async fn fetch_audit_log(&self, did: &str) -> Result<Value> {
        let url = format!("{}/{}/log/audit", self.plc_host, did);
        let response = self.http.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::AuditLogNotFound);
        }
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                service: AUDIT_SERVICE,
                status: response.status(),
            });
        }

        let entries: Value = response.json().await?;
        Ok(serde_json::json!({ "entries": entries }))
    }
}

/// Resolution URL for the supported DID methods.
fn doc_url(plc_host: &str, did: &str) -> Result<String> {
    if did.starts_with("did:plc:") {
        return Ok(format!("{}/{}", plc_host, did));
    }
    if let Some(host) = did.strip_prefix("did:web:") {
        // Only the bare-domain form is supported; path-based did:web does
        // not occur on the network.
        let host = host.replace("%3A", ":");
        return Ok(format!("https://{}/.well-known/did.json", host));
    }
    Err(Error::UnsupportedDid(did.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plc_dids_resolve_through_the_directory() {
        let url = doc_url("https://plc.directory", "did:plc:abc123").unwrap();
        assert_eq!(url, "https://plc.directory/did:plc:abc123");
    }

    #[test]
    fn web_dids_resolve_through_well_known() {
        let url = doc_url("https://plc.directory", "did:web:example.com").unwrap();
        assert_eq!(url, "https://example.com/.well-known/did.json");
    }

    #[test]
    fn other_methods_are_unsupported() {
        assert!(matches!(
            doc_url("https://plc.directory", "did:key:z6Mk"),
            Err(Error::UnsupportedDid(_))
        ));
    }
}
