//! The enrichment fan-out/fan-in stage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tern_core::bus::{Consumer, ConsumerConfig, Producer, ProducerConfig, StartOffset};
use tern_core::event::{
    AbuseMatchResult, ClassifierResult, HashResult, OcrResult, PrescreenResult,
};
use tern_core::{Commit, CommitOperation, EnrichedEvent, FirehoseEvent, ImageResults, RulesInputEvent};

use crate::clients::{
    AbuseClient, CdnClient, ClassifierClient, DidClient, ModRepoClient, OcrClient, PhashClient,
    PrescreenClient, ProfileClient,
};
use crate::error::{Error, Result};
use crate::images::{self, BlobRef};

/// Partition count of the enriched-events topic.
const OUTPUT_PARTITIONS: i32 = 100;
/// Enriched events can carry several image result groups.
const MAX_MESSAGE_BYTES: usize = 5 << 20;
/// Budget for all image enrichment dispatched for one event.
const IMAGE_DISPATCH_BUDGET: Duration = Duration::from_secs(30);

/// Enricher configuration.
#[derive(Debug, Clone)]
pub struct EnricherArgs {
    pub bootstrap_servers: Vec<String>,
    pub input_topic: String,
    pub output_topic: String,
    pub consumer_group: String,
    /// Whether `DELETE` commits flow through enrichment.
    pub enrich_deletes: bool,
}

/// The set of configured enrichment clients. Every client is optional; a
/// missing client produces no sub-result.
#[derive(Default)]
pub struct Clients {
    pub profile: Option<Arc<ProfileClient>>,
    pub mod_repo: Option<Arc<ModRepoClient>>,
    pub identity: Option<Arc<DidClient>>,
    pub cdn: Option<Arc<CdnClient>>,
    pub prescreen: Option<Arc<PrescreenClient>>,
    pub classifier: Option<Arc<ClassifierClient>>,
    pub ocr: Option<Arc<OcrClient>>,
    pub phash: Option<Arc<PhashClient>>,
    pub abuse: Option<Arc<AbuseClient>>,
}

/// The enricher process.
pub struct Enricher {
    producer: Producer<RulesInputEvent>,
    clients: Arc<Clients>,
    enrich_deletes: bool,
}

enum Fetched {
    RepoView(Arc<Value>),
    Profile(Arc<Value>),
    DidDoc(Arc<Value>),
    AuditLog(Arc<Value>),
    Image(ImageResults),
}

impl Enricher {
    pub async fn new(args: &EnricherArgs, clients: Clients) -> Result<Self> {
        let producer = Producer::new(
            ProducerConfig::new(args.bootstrap_servers.clone(), args.output_topic.clone())
                .ensure_topic(OUTPUT_PARTITIONS)
                .max_message_bytes(MAX_MESSAGE_BYTES),
        )
        .await?;

        Ok(Self {
            producer,
            clients: Arc::new(clients),
            enrich_deletes: args.enrich_deletes,
        })
    }

    /// Consume firehose events until the shutdown token fires.
    pub async fn run(&self, args: &EnricherArgs, shutdown: &CancellationToken) -> Result<()> {
        let consumer = Consumer::<FirehoseEvent>::new(
            ConsumerConfig::new(
                args.bootstrap_servers.clone(),
                args.input_topic.clone(),
                args.consumer_group.clone(),
            )
            .offset(StartOffset::End),
        )?;

        tracing::info!(
            input_topic = %args.input_topic,
            output_topic = %args.output_topic,
            "enricher consuming"
        );

        consumer
            .run(shutdown, |event| self.handle_event(event))
            .await?;

        self.flush(Duration::from_secs(5));
        Ok(())
    }

    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(timeout) {
            tracing::warn!(error = %e, "failed to flush enricher producer");
        }
    }

    /// Enrich one firehose event and emit the rules-engine envelope.
    pub async fn handle_event(&self, event: FirehoseEvent) -> Result<()> {
        let Some(commit) = event.commit.clone() else {
            return Ok(());
        };
        if !should_enrich(&commit, self.enrich_deletes) {
            return Ok(());
        }

        counter!("enricher_events_received", "collection" => commit.collection.clone())
            .increment(1);

        let start = std::time::Instant::now();
        let did = event.did.clone();
        let mut tasks: JoinSet<Option<Fetched>> = JoinSet::new();

        if let Some(client) = self.clients.mod_repo.clone() {
            let did = did.clone();
            tasks.spawn(async move {
                match client.get_repo_view(&did).await {
                    Ok(view) => Some(Fetched::RepoView(view)),
                    Err(e) => {
                        tracing::error!(did = %did, error = %e, "failed to fetch repo view");
                        None
                    }
                }
            });
        }

        if let Some(client) = self.clients.profile.clone() {
            let did = did.clone();
            tasks.spawn(async move {
                match client.get_profile(&did).await {
                    Ok(profile) => Some(Fetched::Profile(profile)),
                    Err(e) => {
                        tracing::error!(did = %did, error = %e, "failed to fetch profile view");
                        None
                    }
                }
            });
        }

        if let Some(client) = self.clients.identity.clone() {
            let doc_did = did.clone();
            let doc_client = Arc::clone(&client);
            tasks.spawn(async move {
                match doc_client.get_did_doc(&doc_did).await {
                    Ok(doc) => Some(Fetched::DidDoc(doc)),
                    Err(e) => {
                        tracing::error!(did = %doc_did, error = %e, "failed to resolve DID document");
                        None
                    }
                }
            });

            // The audit log only exists for directory-managed identifiers;
            // it carries the account creation time.
            if did.starts_with("did:plc:") {
                let audit_did = did.clone();
                tasks.spawn(async move {
                    match client.get_audit_log(&audit_did).await {
                        Ok(log) => Some(Fetched::AuditLog(log)),
                        Err(Error::AuditLogNotFound) => {
                            tracing::info!(did = %audit_did, "no audit log found for DID");
                            None
                        }
                        Err(e) => {
                            tracing::error!(did = %audit_did, error = %e, "failed to fetch audit log");
                            None
                        }
                    }
                });
            }
        }

        if self.clients.cdn.is_some() {
            if let Some(record) = &commit.record {
                let blobs = images::find_blobs(record);
                let videos = blobs.iter().filter(|b| b.is_video()).count();
                if videos > 0 {
                    tracing::debug!(did = %did, videos, "video blobs listed but not dispatched");
                }

                let deadline = Instant::now() + IMAGE_DISPATCH_BUDGET;
                for blob in blobs.into_iter().filter(BlobRef::is_image) {
                    let clients = Arc::clone(&self.clients);
                    let did = did.clone();
                    tasks.spawn(async move {
                        Some(Fetched::Image(enrich_image(clients, did, blob, deadline).await))
                    });
                }
            }
        }

        let mut enriched = EnrichedEvent {
            did: event.did.clone(),
            timestamp: event.timestamp,
            collection: commit.collection.clone(),
            rkey: commit.rkey.clone(),
            cid: commit.cid.clone(),
            operation: commit.operation,
            record: commit.record.clone(),
            repo_view: None,
            profile_view: None,
            did_doc: None,
            did_audit_log: None,
            image_results: HashMap::new(),
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(Fetched::RepoView(v))) => enriched.repo_view = Some((*v).clone()),
                Ok(Some(Fetched::Profile(v))) => enriched.profile_view = Some((*v).clone()),
                Ok(Some(Fetched::DidDoc(v))) => enriched.did_doc = Some((*v).clone()),
                Ok(Some(Fetched::AuditLog(v))) => enriched.did_audit_log = Some((*v).clone()),
                Ok(Some(Fetched::Image(results))) => {
                    enriched.image_results.insert(results.cid.clone(), results);
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "enrichment task panicked"),
            }
        }

        tracing::info!(
            did = %event.did,
            collection = %commit.collection,
            rkey = %commit.rkey,
            duration_seconds = start.elapsed().as_secs_f64(),
            "record fully processed"
        );

        let envelope = RulesInputEvent::wrap(&enriched)?;
        match self.producer.produce(&event.did, &envelope).await {
            Ok(()) => {
                counter!("enricher_events_produced", "collection" => commit.collection.clone(), "status" => "ok")
                    .increment(1);
                Ok(())
            }
            Err(e) => {
                counter!("enricher_events_produced", "collection" => commit.collection.clone(), "status" => "error")
                    .increment(1);
                Err(e.into())
            }
        }
    }
}

/// Deletes short-circuit enrichment unless explicitly enabled.
fn should_enrich(commit: &Commit, enrich_deletes: bool) -> bool {
    match commit.operation {
        CommitOperation::Create | CommitOperation::Update => true,
        CommitOperation::Delete => enrich_deletes,
    }
}

/// Run every configured image enricher against one blob.
async fn enrich_image(
    clients: Arc<Clients>,
    did: String,
    blob: BlobRef,
    deadline: Instant,
) -> ImageResults {
    let mut results = ImageResults::new(&blob.cid);

    let Some(cdn) = &clients.cdn else {
        return results;
    };

    let bytes = match with_deadline(deadline, cdn.get_image_bytes(&did, &blob.cid)).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(did = %did, cid = %blob.cid, error = %e, "failed to download image");
            return results;
        }
    };

    let (screen, ocr, hash, abuse) = tokio::join!(
        run_classifier_chain(&clients, &did, &bytes, deadline),
        run_ocr(&clients, &did, &blob.cid, &bytes, deadline),
        run_phash(&clients, &did, &blob.cid, &bytes, deadline),
        run_abuse(&clients, &did, &bytes, deadline),
    );

    results.prescreen = screen.0;
    results.classifier = screen.1;
    results.ocr = ocr;
    results.hash = hash;
    results.abuse_match = abuse;
    results
}

/// Prescreen first; an `sfw` decision suppresses the heavy classifier.
async fn run_classifier_chain(
    clients: &Clients,
    did: &str,
    image: &[u8],
    deadline: Instant,
) -> (Option<PrescreenResult>, Option<ClassifierResult>) {
    let mut prescreen = None;

    if let Some(client) = &clients.prescreen {
        match with_deadline(deadline, client.scan(did, image)).await {
            Ok((raw, decision)) => {
                let sfw = decision == "sfw";
                prescreen = Some(PrescreenResult {
                    raw: Some(raw),
                    decision: Some(decision),
                    error: None,
                });
                if sfw {
                    return (prescreen, None);
                }
            }
            Err(e) => {
                return (
                    Some(PrescreenResult {
                        raw: None,
                        decision: None,
                        error: Some(e.to_string()),
                    }),
                    None,
                );
            }
        }
    }

    let classifier = match &clients.classifier {
        Some(client) => Some(match with_deadline(deadline, client.scan(image)).await {
            Ok((raw, classes)) => ClassifierResult {
                raw: Some(raw),
                classes,
                error: None,
            },
            Err(e) => ClassifierResult {
                raw: None,
                classes: HashMap::new(),
                error: Some(e.to_string()),
            },
        }),
        None => None,
    };

    (prescreen, classifier)
}

async fn run_ocr(
    clients: &Clients,
    did: &str,
    cid: &str,
    image: &[u8],
    deadline: Instant,
) -> Option<OcrResult> {
    let client = clients.ocr.as_ref()?;
    Some(
        match with_deadline(deadline, client.scan(did, cid, image)).await {
            Ok((raw, text)) => OcrResult {
                raw: Some(raw),
                text: Some(text),
                error: None,
            },
            Err(e) => OcrResult {
                raw: None,
                text: None,
                error: Some(e.to_string()),
            },
        },
    )
}

async fn run_phash(
    clients: &Clients,
    did: &str,
    cid: &str,
    image: &[u8],
    deadline: Instant,
) -> Option<HashResult> {
    let client = clients.phash.as_ref()?;
    Some(
        match with_deadline(deadline, client.hash(did, cid, image)).await {
            Ok((raw, parsed)) => HashResult {
                raw: Some(raw),
                hash: Some(parsed.hash),
                quality_too_low: Some(parsed.quality_too_low),
                error: None,
            },
            Err(e) => HashResult {
                raw: None,
                hash: None,
                quality_too_low: None,
                error: Some(e.to_string()),
            },
        },
    )
}

async fn run_abuse(
    clients: &Clients,
    did: &str,
    image: &[u8],
    deadline: Instant,
) -> Option<AbuseMatchResult> {
    let client = clients.abuse.as_ref()?;
    Some(
        match with_deadline(deadline, client.scan(did, image)).await {
            Ok((raw, is_match)) => AbuseMatchResult {
                raw: Some(raw),
                is_match: Some(is_match),
                error: None,
            },
            Err(e) => AbuseMatchResult {
                raw: None,
                is_match: None,
                error: Some(e.to_string()),
            },
        },
    )
}

async fn with_deadline<T>(
    deadline: Instant,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::BudgetElapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(operation: CommitOperation) -> Commit {
        Commit {
            rev: "3kxyz".to_string(),
            operation,
            collection: "app.bsky.feed.post".to_string(),
            rkey: "3kfoo".to_string(),
            record: None,
            cid: None,
        }
    }

    #[test]
    fn deletes_short_circuit_by_default() {
        assert!(should_enrich(&commit(CommitOperation::Create), false));
        assert!(should_enrich(&commit(CommitOperation::Update), false));
        assert!(!should_enrich(&commit(CommitOperation::Delete), false));
        assert!(should_enrich(&commit(CommitOperation::Delete), true));
    }

    #[tokio::test]
    async fn unconfigured_clients_produce_no_sub_results() {
        let clients = Clients::default();
        let deadline = Instant::now() + Duration::from_secs(1);

        let (prescreen, classifier) =
            run_classifier_chain(&clients, "did:plc:abc", b"jpeg", deadline).await;
        assert!(prescreen.is_none());
        assert!(classifier.is_none());
        assert!(run_ocr(&clients, "did:plc:abc", "bafk", b"jpeg", deadline)
            .await
            .is_none());
        assert!(run_phash(&clients, "did:plc:abc", "bafk", b"jpeg", deadline)
            .await
            .is_none());
        assert!(run_abuse(&clients, "did:plc:abc", b"jpeg", deadline)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn image_task_without_cdn_yields_empty_group() {
        let results = enrich_image(
            Arc::new(Clients::default()),
            "did:plc:abc".to_string(),
            BlobRef {
                cid: "bafkreia".to_string(),
                mime_type: "image/jpeg".to_string(),
            },
            Instant::now() + Duration::from_secs(1),
        )
        .await;

        assert_eq!(results.cid, "bafkreia");
        assert!(results.prescreen.is_none());
        assert!(results.classifier.is_none());
        assert!(results.ocr.is_none());
        assert!(results.hash.is_none());
        assert!(results.abuse_match.is_none());
    }
}
