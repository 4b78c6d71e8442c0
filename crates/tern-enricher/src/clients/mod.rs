//! Enrichment service clients.
//!
//! Every client follows the same shape: a token-bucket limiter wait, an
//! optional TTL-LRU cache lookup, the HTTP call, and a duration metric with
//! an `ok`/`error` status label. Clients are optional at the enricher level;
//! construction only happens when the service is configured.

pub mod abuse;
pub mod cdn;
pub mod classifier;
pub mod identity;
pub mod mod_repo;
pub mod ocr;
pub mod phash;
pub mod prescreen;
pub mod profile;

pub use abuse::AbuseClient;
pub use cdn::CdnClient;
pub use classifier::ClassifierClient;
pub use identity::DidClient;
pub use mod_repo::ModRepoClient;
pub use ocr::OcrClient;
pub use phash::PhashClient;
pub use prescreen::PrescreenClient;
pub use profile::ProfileClient;

use std::time::Instant;

pub(crate) const USER_AGENT: &str = concat!("tern-enricher/", env!("CARGO_PKG_VERSION"));

/// Record a service call duration with its outcome.
pub(crate) fn observe_api(service: &'static str, ok: bool, start: Instant) {
    let status = if ok { "ok" } else { "error" };
    metrics::histogram!("enricher_api_duration_sec", "service" => service, "status" => status)
        .record(start.elapsed().as_secs_f64());
}

/// Record a cache hit or miss.
pub(crate) fn cache_result(service: &'static str, result: &'static str) {
    metrics::counter!("enricher_api_cache_result", "service" => service, "result" => result)
        .increment(1);
}

/// Publish the current entry count of a client cache.
pub(crate) fn cache_size(service: &'static str, cache: &moka::sync::Cache<String, impl Clone + Send + Sync + 'static>) {
    metrics::gauge!("enricher_api_cache_size", "service" => service).set(cache.entry_count() as f64);
}
