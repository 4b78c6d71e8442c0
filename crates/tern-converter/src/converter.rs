//! The converter loop: subscribe, decode, validate, produce, checkpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;

use tern_core::bus::{Cursor, CursorStore, Producer, ProducerConfig};
use tern_core::{Commit, CommitOperation, EventKind, FirehoseEvent};

use crate::error::{Error, Result};
use crate::firehose::{self, CommitFrame, FirehoseMessage, FirehoseSubscriber, RepoOp};
use crate::repo::RepoArchive;
use crate::scheduler::ShardedScheduler;

/// Parallel shard workers for distinct subjects.
const WORKERS: usize = 50;
/// Bounded queue depth per shard.
const QUEUE_DEPTH: usize = 100;
/// Partition count of the output topic.
const OUTPUT_PARTITIONS: i32 = 200;

const CURSOR_SAVE_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Converter configuration.
#[derive(Debug, Clone)]
pub struct ConverterArgs {
    /// Full WebSocket URL of the relay subscription endpoint.
    pub relay_host: String,
    pub bootstrap_servers: Vec<String>,
    pub output_topic: String,
    /// Sequence to resume from; negative means "use the persisted cursor".
    pub cursor_override: i64,
}

/// The firehose converter process.
pub struct Converter {
    args: ConverterArgs,
}

impl Converter {
    pub fn new(args: ConverterArgs) -> Result<Self> {
        if args.bootstrap_servers.is_empty() {
            return Err(tern_core::Error::Config(
                "no bootstrap servers provided to converter".to_string(),
            )
            .into());
        }
        if args.output_topic.is_empty() {
            return Err(
                tern_core::Error::Config("no output topic provided to converter".to_string())
                    .into(),
            );
        }
        if args.relay_host.is_empty() {
            return Err(
                tern_core::Error::Config("no relay host provided to converter".to_string()).into(),
            );
        }
        Ok(Self { args })
    }

    /// Run until the shutdown token fires or the subscription dies.
    ///
    /// Transport errors return `Err` after the drain/checkpoint sequence so
    /// an external supervisor restarts the process; cursor integrity makes
    /// the restart resume at-least-once from the last saved point.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("starting converter...");

        let producer = Producer::new(
            ProducerConfig::new(
                self.args.bootstrap_servers.clone(),
                self.args.output_topic.clone(),
            )
            .ensure_topic(OUTPUT_PARTITIONS),
        )
        .await?;

        let cursor_store = CursorStore::new(
            self.args.bootstrap_servers.clone(),
            format!("{}-producer-cursor", self.args.output_topic),
        )
        .await?;

        let pipeline = Arc::new(Pipeline {
            producer,
            last_cursor: CursorMark::new(),
        });

        if self.args.cursor_override >= 0 {
            tracing::info!(cursor = self.args.cursor_override, "cursor override set");
            pipeline.update_cursor(self.args.cursor_override);
        } else {
            tracing::info!("fetching last cursor from bus");
            match cursor_store.load().await? {
                Some(cursor) => {
                    tracing::info!(
                        cursor = cursor.sequence,
                        saved_on_exit = cursor.saved_on_exit,
                        "loaded last cursor"
                    );
                    pipeline.update_cursor(cursor.sequence);
                }
                None => tracing::info!("no previous cursor found, starting from live tail"),
            }
        }

        let resume = pipeline.cursor();
        let mut subscriber = FirehoseSubscriber::connect(&self.args.relay_host, resume).await?;

        let save_token = CancellationToken::new();
        let save_handle = tokio::spawn(cursor_save_loop(
            cursor_store,
            Arc::clone(&pipeline),
            save_token.clone(),
        ));

        let worker_pipeline = Arc::clone(&pipeline);
        let scheduler = ShardedScheduler::new(WORKERS, QUEUE_DEPTH, move |msg: FirehoseMessage| {
            let pipeline = Arc::clone(&worker_pipeline);
            async move { pipeline.handle_message(msg).await }
        });

        let stream_result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("received shutdown signal");
                    break Ok(());
                }
                frame = subscriber.next_frame() => match frame {
                    None => break Err(Error::StreamClosed),
                    Some(Err(e)) => break Err(e),
                    Some(Ok(data)) => match firehose::parse_frame(&data) {
                        Ok(Some(message)) => {
                            let key = message.did().to_string();
                            if let Err(e) = scheduler.dispatch(&key, message).await {
                                break Err(e);
                            }
                        }
                        Ok(None) => {}
                        Err(e @ Error::Stream(_)) => break Err(e),
                        Err(e) => {
                            // A bad frame must not block the stream.
                            counter!("firehose_events_received", "kind" => "frame", "status" => "error")
                                .increment(1);
                            tracing::warn!(error = %e, "failed to decode frame, skipping");
                        }
                    }
                }
            }
        };

        tracing::info!("draining in-flight workers");
        scheduler.shutdown(SHUTDOWN_GRACE).await;

        if let Err(e) = pipeline.producer.flush(SHUTDOWN_GRACE) {
            tracing::warn!(error = %e, "failed to flush producer on shutdown");
        }

        save_token.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, save_handle)
            .await
            .is_err()
        {
            tracing::warn!("cursor save loop did not finish in time, forcing shutdown");
        }

        if let Err(ref e) = stream_result {
            tracing::error!(error = %e, "subscription ended");
        } else {
            tracing::info!("graceful shutdown complete");
        }
        stream_result
    }
}

/// Monotonic high-water mark guarded by a short mutex.
struct CursorMark(Mutex<Option<i64>>);

impl CursorMark {
    fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn update(&self, seq: i64) {
        let mut last = self.0.lock().unwrap();
        if last.is_none_or(|cur| seq > cur) {
            *last = Some(seq);
        }
    }

    fn get(&self) -> Option<i64> {
        *self.0.lock().unwrap()
    }
}

/// Shared state the shard workers operate on.
struct Pipeline {
    producer: Producer<FirehoseEvent>,
    /// High-water mark of handled sequences.
    last_cursor: CursorMark,
}

impl Pipeline {
    fn update_cursor(&self, seq: i64) {
        self.last_cursor.update(seq);
    }

    fn cursor(&self) -> Option<i64> {
        self.last_cursor.get()
    }

    async fn handle_message(&self, message: FirehoseMessage) {
        let seq = message.seq();
        match message {
            FirehoseMessage::Commit(frame) => self.handle_commit(frame).await,
            FirehoseMessage::Identity(frame) => {
                let did = frame.did.clone();
                let payload = serde_json::to_value(&frame).ok();
                self.handle_raw_frame("identity", &did, &frame.time, |timestamp| FirehoseEvent {
                    did: did.clone(),
                    timestamp,
                    kind: EventKind::Identity,
                    commit: None,
                    account: None,
                    identity: payload.clone(),
                })
                .await;
            }
            FirehoseMessage::Account(frame) => {
                let did = frame.did.clone();
                let payload = serde_json::to_value(&frame).ok();
                self.handle_raw_frame("account", &did, &frame.time, |timestamp| FirehoseEvent {
                    did: did.clone(),
                    timestamp,
                    kind: EventKind::Account,
                    commit: None,
                    account: payload.clone(),
                    identity: None,
                })
                .await;
            }
        }
        self.update_cursor(seq);
    }

    /// Identity and account frames are forwarded verbatim.
    async fn handle_raw_frame<F>(&self, kind: &'static str, did: &str, time: &str, build: F)
    where
        F: Fn(DateTime<Utc>) -> FirehoseEvent,
    {
        let timestamp = match DateTime::parse_from_rfc3339(time) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                counter!("firehose_events_received", "kind" => kind, "status" => "error")
                    .increment(1);
                tracing::error!(did, error = %e, "error parsing frame time");
                return;
            }
        };

        let event = build(timestamp);
        match self.producer.produce(did, &event).await {
            Ok(()) => {
                counter!("events_produced", "kind" => kind, "status" => "ok").increment(1);
            }
            Err(e) => {
                counter!("events_produced", "kind" => kind, "status" => "error").increment(1);
                tracing::error!(did, error = %e, "failed to produce message to bus");
            }
        }
        counter!("firehose_events_received", "kind" => kind, "status" => "ok").increment(1);
    }

    async fn handle_commit(&self, frame: CommitFrame) {
        if frame.too_big {
            // Legacy oversized frames carry no usable blocks.
            tracing::warn!(repo = %frame.repo, seq = frame.seq, rev = %frame.rev, "repo commit too big, dropping");
            return;
        }

        let archive = match RepoArchive::read(&frame.blocks).await {
            Ok(archive) => archive,
            Err(e) => {
                counter!("firehose_events_received", "kind" => "commit", "status" => "error")
                    .increment(1);
                tracing::error!(repo = %frame.repo, seq = frame.seq, error = %e, "failed to read commit archive");
                return;
            }
        };

        let timestamp = match DateTime::parse_from_rfc3339(&frame.time) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                counter!("firehose_events_received", "kind" => "commit", "status" => "error")
                    .increment(1);
                tracing::error!(repo = %frame.repo, seq = frame.seq, error = %e, "error parsing commit time");
                return;
            }
        };

        for op in &frame.ops {
            let event = match build_commit_event(&frame, &archive, timestamp, op) {
                Ok(event) => event,
                Err(e) => {
                    counter!("firehose_events_received", "kind" => "commit", "status" => "error")
                        .increment(1);
                    tracing::error!(
                        repo = %frame.repo,
                        seq = frame.seq,
                        path = %op.path,
                        action = %op.action,
                        error = %e,
                        "skipping bad record op"
                    );
                    continue;
                }
            };

            match self.producer.produce(&frame.repo, &event).await {
                Ok(()) => {
                    counter!("events_produced", "kind" => "commit", "status" => "ok").increment(1);
                }
                Err(e) => {
                    counter!("events_produced", "kind" => "commit", "status" => "error")
                        .increment(1);
                    tracing::error!(repo = %frame.repo, error = %e, "failed to produce message to bus");
                }
            }
            counter!("firehose_events_received", "kind" => "commit", "status" => "ok").increment(1);
        }
    }
}

/// Decode and validate one record op into a firehose event.
pub(crate) fn build_commit_event(
    frame: &CommitFrame,
    archive: &RepoArchive,
    timestamp: DateTime<Utc>,
    op: &RepoOp,
) -> Result<FirehoseEvent> {
    let (collection, rkey) = split_path(&op.path)?;

    let commit = match op.action.as_str() {
        action @ ("create" | "update") => {
            let declared = op.cid.as_ref().ok_or(Error::MissingCid)?;
            let (cid, record) = archive.record(declared)?;
            Commit {
                rev: frame.rev.clone(),
                operation: if action == "create" {
                    CommitOperation::Create
                } else {
                    CommitOperation::Update
                },
                collection,
                rkey,
                record: Some(record),
                cid: Some(cid),
            }
        }
        // Deletes carry no record bytes and no content-address.
        "delete" => Commit {
            rev: frame.rev.clone(),
            operation: CommitOperation::Delete,
            collection,
            rkey,
            record: None,
            cid: None,
        },
        other => return Err(Error::UnknownAction(other.to_string())),
    };

    Ok(FirehoseEvent {
        did: frame.repo.clone(),
        timestamp,
        kind: EventKind::Commit,
        commit: Some(commit),
        account: None,
        identity: None,
    })
}

fn split_path(path: &str) -> Result<(String, String)> {
    match path.split_once('/') {
        Some((collection, rkey)) if !collection.is_empty() && !rkey.is_empty() => {
            Ok((collection.to_string(), rkey.to_string()))
        }
        _ => Err(Error::BadPath(path.to_string())),
    }
}

/// Persist the high-water mark every few seconds, and once more on exit with
/// `saved_on_exit` so the next run knows no gap was left open.
async fn cursor_save_loop(
    store: CursorStore,
    pipeline: Arc<Pipeline>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(CURSOR_SAVE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("exit signal received, stopping cursor save loop");
                break;
            }
            _ = ticker.tick() => {
                if let Some(sequence) = pipeline.cursor() {
                    match store
                        .save(&Cursor { sequence, saved_on_exit: false })
                        .await
                    {
                        Ok(()) => {
                            gauge!("firehose_cursor_sequence").set(sequence as f64);
                            tracing::debug!(sequence, "saved cursor");
                        }
                        Err(e) => tracing::error!(error = %e, "failed to save cursor"),
                    }
                }
            }
        }
    }

    // Final flush so the reader knows this was a clean exit.
    if let Some(sequence) = pipeline.cursor() {
        match store
            .save(&Cursor {
                sequence,
                saved_on_exit: true,
            })
            .await
        {
            Ok(()) => tracing::info!(sequence, "saved cursor on exit"),
            Err(e) => tracing::error!(error = %e, "failed to save cursor on exit"),
        }
    }
    if let Err(e) = store.flush(SHUTDOWN_GRACE) {
        tracing::warn!(error = %e, "failed to flush cursor store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::compute_cid;
    use ipld_core::cid::Cid;
    use iroh_car::{CarHeader, CarWriter};

    fn record_bytes() -> Vec<u8> {
        serde_ipld_dagcbor::to_vec(&serde_json::json!({
            "$type": "app.bsky.feed.post",
            "text": "hello",
        }))
        .unwrap()
    }

    async fn car_with(blocks: Vec<(Cid, Vec<u8>)>) -> Vec<u8> {
        let root = blocks
            .first()
            .map(|(cid, _)| *cid)
            .unwrap_or_else(|| compute_cid(b"empty"));
        let mut out = Vec::new();
        let mut writer = CarWriter::new(CarHeader::new_v1(vec![root]), &mut out);
        writer.write_header().await.unwrap();
        for (cid, data) in blocks {
            writer.write(cid, data).await.unwrap();
        }
        writer.finish().await.unwrap();
        out
    }

    fn frame_with(ops: Vec<RepoOp>, blocks: serde_bytes::ByteBuf) -> CommitFrame {
        CommitFrame {
            seq: 1000,
            too_big: false,
            repo: "did:plc:abc".to_string(),
            rev: "3kxyz".to_string(),
            blocks,
            ops,
            time: "2024-06-01T00:00:00Z".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn create_op_emits_validated_commit() {
        let bytes = record_bytes();
        let cid = compute_cid(&bytes);
        let car = car_with(vec![(cid, bytes)]).await;
        let archive = RepoArchive::read(&car).await.unwrap();

        let op = RepoOp {
            action: "create".to_string(),
            path: "app.bsky.feed.post/3kfoo".to_string(),
            cid: Some(cid),
        };
        let frame = frame_with(vec![op.clone()], serde_bytes::ByteBuf::from(car));

        let event = build_commit_event(&frame, &archive, now(), &op).unwrap();
        assert_eq!(event.kind, EventKind::Commit);
        let commit = event.commit.unwrap();
        assert_eq!(commit.operation, CommitOperation::Create);
        assert_eq!(commit.collection, "app.bsky.feed.post");
        assert_eq!(commit.rkey, "3kfoo");
        assert_eq!(commit.cid.as_deref(), Some(cid.to_string().as_str()));
        assert_eq!(commit.record.unwrap()["text"], "hello");
    }

    #[tokio::test]
    async fn mismatched_declared_cid_is_dropped() {
        let bytes = record_bytes();
        let wrong_cid = compute_cid(b"something else entirely");
        // Block stored under a cid that does not match its contents.
        let car = car_with(vec![(wrong_cid, bytes)]).await;
        let archive = RepoArchive::read(&car).await.unwrap();

        let op = RepoOp {
            action: "create".to_string(),
            path: "app.bsky.feed.post/3kfoo".to_string(),
            cid: Some(wrong_cid),
        };
        let frame = frame_with(vec![op.clone()], serde_bytes::ByteBuf::from(car));

        assert!(matches!(
            build_commit_event(&frame, &archive, now(), &op),
            Err(Error::CidMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn delete_op_carries_no_record() {
        let car = car_with(vec![]).await;
        let archive = RepoArchive::read(&car).await.unwrap();

        let op = RepoOp {
            action: "delete".to_string(),
            path: "app.bsky.feed.post/3kfoo".to_string(),
            cid: None,
        };
        let frame = frame_with(vec![op.clone()], serde_bytes::ByteBuf::from(car));

        let event = build_commit_event(&frame, &archive, now(), &op).unwrap();
        let commit = event.commit.unwrap();
        assert_eq!(commit.operation, CommitOperation::Delete);
        assert!(commit.record.is_none());
        assert!(commit.cid.is_none());
    }

    #[tokio::test]
    async fn create_without_cid_is_rejected() {
        let car = car_with(vec![]).await;
        let archive = RepoArchive::read(&car).await.unwrap();

        let op = RepoOp {
            action: "create".to_string(),
            path: "app.bsky.feed.post/3kfoo".to_string(),
            cid: None,
        };
        let frame = frame_with(vec![op.clone()], serde_bytes::ByteBuf::from(car));

        assert!(matches!(
            build_commit_event(&frame, &archive, now(), &op),
            Err(Error::MissingCid)
        ));
    }

    #[test]
    fn path_splitting_rejects_malformed_paths() {
        assert!(split_path("collection-only").is_err());
        assert!(split_path("/rkey").is_err());
        assert!(split_path("collection/").is_err());
        let (c, r) = split_path("app.bsky.feed.post/3kfoo").unwrap();
        assert_eq!(c, "app.bsky.feed.post");
        assert_eq!(r, "3kfoo");
    }

    #[test]
    fn cursor_high_water_mark_is_monotonic() {
        let mark = CursorMark::new();
        assert_eq!(mark.get(), None);
        mark.update(10);
        mark.update(5);
        assert_eq!(mark.get(), Some(10));
        mark.update(11);
        assert_eq!(mark.get(), Some(11));
    }
}
