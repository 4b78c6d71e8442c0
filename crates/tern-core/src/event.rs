//! Pipeline event model.
//!
//! These types travel between pipeline stages as JSON-encoded bus messages,
//! keyed by the subject DID so that per-subject ordering is preserved by bus
//! partitioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a firehose event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Commit,
    Account,
    Identity,
}

/// Operation carried by a commit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitOperation {
    Create,
    Update,
    Delete,
}

impl CommitOperation {
    /// Suffix used when building a rules-engine action name.
    pub fn action_suffix(&self) -> &'static str {
        match self {
            CommitOperation::Create => "create",
            CommitOperation::Update => "update",
            CommitOperation::Delete => "delete",
        }
    }
}

/// A single record operation from a repo commit.
///
/// `record` and `cid` are absent on deletes. For creates and updates the
/// record is the canonical JSON form of the decoded block, and `cid` is the
/// content-address the converter validated against the block bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub rev: String,
    pub operation: CommitOperation,
    pub collection: String,
    pub rkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Converter output: one normalized firehose event, keyed by subject DID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseEvent {
    pub did: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
    /// Raw account frame payload, forwarded verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<serde_json::Value>,
    /// Raw identity frame payload, forwarded verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<serde_json::Value>,
}

/// A named enrichment sub-result: raw service response plus parsed fields,
/// or an error string when the call failed. A missing sub-result means the
/// corresponding client was not configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescreenResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub classes: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_too_low: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbuseMatchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-image enrichment result group, keyed by the image content-address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResults {
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prescreen: Option<PrescreenResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<ClassifierResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abuse_match: Option<AbuseMatchResult>,
}

impl ImageResults {
    pub fn new(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            ..Default::default()
        }
    }
}

/// Enricher output: the original commit alongside enrichment blobs.
///
/// The identity blobs hold the raw JSON returned by the respective services;
/// rules consumers must tolerate any of them being absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEvent {
    pub did: String,
    pub timestamp: DateTime<Utc>,
    pub collection: String,
    pub rkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub operation: CommitOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_view: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_view: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_doc: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_audit_log: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub image_results: HashMap<String, ImageResults>,
}

/// Envelope the rules engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesInputEvent {
    pub send_time: DateTime<Utc>,
    pub data: RulesInputEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesInputEventData {
    /// `<collection>#<create|update|delete>`.
    pub action_name: String,
    /// Microsecond epoch at envelope creation.
    pub action_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub secret_data: HashMap<String, String>,
    pub encoding: String,
    /// JSON-serialized [`EnrichedEvent`].
    pub data: serde_json::Value,
}

impl RulesInputEvent {
    /// Wrap an enriched event into the rules-engine input envelope.
    pub fn wrap(event: &EnrichedEvent) -> serde_json::Result<Self> {
        let action_name = format!("{}#{}", event.collection, event.operation.action_suffix());
        Ok(Self {
            send_time: Utc::now(),
            data: RulesInputEventData {
                action_name,
                action_id: Utc::now().timestamp_micros(),
                timestamp: event.timestamp,
                secret_data: HashMap::new(),
                encoding: "UTF8".to_string(),
                data: serde_json::to_value(event)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_enriched(operation: CommitOperation) -> EnrichedEvent {
        EnrichedEvent {
            did: "did:plc:abc123".to_string(),
            timestamp: Utc::now(),
            collection: "app.bsky.feed.post".to_string(),
            rkey: "3kabc".to_string(),
            cid: Some("bafyreib".to_string()),
            operation,
            record: Some(serde_json::json!({"text": "hello"})),
            repo_view: None,
            profile_view: None,
            did_doc: None,
            did_audit_log: None,
            image_results: HashMap::new(),
        }
    }

    #[test]
    fn action_name_carries_operation_suffix() {
        let evt = RulesInputEvent::wrap(&sample_enriched(CommitOperation::Create)).unwrap();
        assert_eq!(evt.data.action_name, "app.bsky.feed.post#create");

        let evt = RulesInputEvent::wrap(&sample_enriched(CommitOperation::Update)).unwrap();
        assert_eq!(evt.data.action_name, "app.bsky.feed.post#update");

        let evt = RulesInputEvent::wrap(&sample_enriched(CommitOperation::Delete)).unwrap();
        assert_eq!(evt.data.action_name, "app.bsky.feed.post#delete");
    }

    #[test]
    fn envelope_embeds_enriched_event() {
        let enriched = sample_enriched(CommitOperation::Create);
        let evt = RulesInputEvent::wrap(&enriched).unwrap();
        assert_eq!(evt.data.encoding, "UTF8");
        assert!(evt.data.action_id > 0);
        let embedded: EnrichedEvent = serde_json::from_value(evt.data.data.clone()).unwrap();
        assert_eq!(embedded.did, enriched.did);
        assert_eq!(embedded.rkey, enriched.rkey);
    }

    #[test]
    fn firehose_event_round_trips_through_json() {
        let evt = FirehoseEvent {
            did: "did:plc:xyz".to_string(),
            timestamp: Utc::now(),
            kind: EventKind::Commit,
            commit: Some(Commit {
                rev: "abc".to_string(),
                operation: CommitOperation::Delete,
                collection: "app.bsky.feed.like".to_string(),
                rkey: "3kxyz".to_string(),
                record: None,
                cid: None,
            }),
            account: None,
            identity: None,
        };

        let bytes = serde_json::to_vec(&evt).unwrap();
        let back: FirehoseEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.did, evt.did);
        let commit = back.commit.unwrap();
        assert_eq!(commit.operation, CommitOperation::Delete);
        assert!(commit.record.is_none());
        assert!(commit.cid.is_none());
    }
}
