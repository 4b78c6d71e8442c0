//! Batched analytics inserter and the warehouse-backed sinks built on it.
//!
//! Rows queue under a mutex; when a batch fills it is drained and submitted
//! in a background task. Pending submissions are bounded: once the bound is
//! hit new batches are dropped with a warning to protect upstream latency.
//! There is no retry; durability is the warehouse's problem.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use clickhouse::Row;
use metrics::{counter, gauge, histogram};
use serde::Serialize;

use tern_core::AtUri;

use crate::error::Result;
use crate::logmgr::{EffectLog, EffectLogger, EventLog};

const DEFAULT_MAX_PENDING_SENDS: usize = 100;

/// Row for the verdict-events table.
#[derive(Debug, Clone, Row, Serialize)]
pub struct EventRow {
    pub action_name: String,
    pub action_id: i64,
    pub did: String,
    pub uri: String,
    pub cid: String,
    pub raw: String,
    pub send_time: i64,
    pub created_at: i64,
}

/// Row for the applied-effects table.
#[derive(Debug, Clone, Row, Serialize)]
pub struct EffectRow {
    pub action_name: String,
    pub action_id: i64,
    pub subject: String,
    pub kind: String,
    pub rules: String,
    pub comment: String,
    pub label: Option<String>,
    pub tag: Option<String>,
    pub email: Option<String>,
    pub created_at: i64,
}

/// Row for the tagged-posts table.
#[derive(Debug, Clone, Row, Serialize)]
pub struct FlagRow {
    pub uri: String,
    pub did: String,
    pub collection: String,
    pub rkey: String,
    pub tag: String,
    pub created_at: i64,
}

/// Queue-and-drain batch inserter for one warehouse table.
pub struct BatchInserter<T> {
    client: clickhouse::Client,
    table: String,
    queue: Mutex<Vec<T>>,
    batch_size: usize,
    pending: Arc<Mutex<usize>>,
    max_pending: usize,
}

impl<T> BatchInserter<T>
where
    T: Row + Serialize + Send + Sync + 'static,
{
    pub fn new(
        client: clickhouse::Client,
        table: impl Into<String>,
        batch_size: usize,
        max_pending: usize,
    ) -> Self {
        Self {
            client,
            table: table.into(),
            queue: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
            pending: Arc::new(Mutex::new(0)),
            max_pending: if max_pending == 0 {
                DEFAULT_MAX_PENDING_SENDS
            } else {
                max_pending
            },
        }
    }

    /// Queue a row; a full batch is drained and submitted in the background.
    pub fn insert(&self, row: T) {
        let to_send = {
            let mut queue = self.queue.lock().unwrap();
            queue.push(row);
            if queue.len() >= self.batch_size {
                std::mem::take(&mut *queue)
            } else {
                Vec::new()
            }
        };

        if !to_send.is_empty() {
            self.spawn_send(to_send);
        }
    }

    /// Submit any remaining partial batch. Called during shutdown.
    pub async fn close(&self) {
        let to_send = std::mem::take(&mut *self.queue.lock().unwrap());
        if to_send.is_empty() {
            return;
        }
        let count = to_send.len();
        match send_rows(&self.client, &self.table, to_send).await {
            Ok(()) => {
                counter!("warehouse_inserts", "status" => "ok").increment(count as u64);
            }
            Err(e) => {
                counter!("warehouse_inserts", "status" => "error").increment(count as u64);
                tracing::error!(table = %self.table, error = %e, "failed to flush final batch");
            }
        }
    }

    fn spawn_send(&self, rows: Vec<T>) {
        {
            let mut pending = self.pending.lock().unwrap();
            if *pending >= self.max_pending {
                tracing::warn!(
                    table = %self.table,
                    pending_sends = *pending,
                    max_pending_sends = self.max_pending,
                    "dropped warehouse batch due to too many pending sends"
                );
                counter!("warehouse_inserts", "status" => "dropped").increment(rows.len() as u64);
                return;
            }
            *pending += 1;
            gauge!("warehouse_pending_sends").set(*pending as f64);
        }

        let client = self.client.clone();
        let table = self.table.clone();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let count = rows.len();
            let start = Instant::now();

            let status = match send_rows(&client, &table, rows).await {
                Ok(()) => {
                    tracing::info!(table = %table, count, "inserted rows into warehouse");
                    "ok"
                }
                Err(e) => {
                    tracing::error!(table = %table, count, error = %e, "unable to insert rows into warehouse");
                    "error"
                }
            };

            histogram!("warehouse_insert_duration_sec").record(start.elapsed().as_secs_f64());
            counter!("warehouse_inserts", "status" => status).increment(count as u64);

            let mut pending = pending.lock().unwrap();
            *pending -= 1;
            gauge!("warehouse_pending_sends").set(*pending as f64);
        });
    }
}

async fn send_rows<T>(client: &clickhouse::Client, table: &str, rows: Vec<T>) -> Result<()>
where
    T: Row + Serialize,
{
    let mut insert = client.insert(table)?;
    for row in &rows {
        insert.write(row).await?;
    }
    insert.end().await?;
    Ok(())
}

/// Warehouse sink for the log manager: all events, all applied effects.
pub struct WarehouseLogger {
    events: BatchInserter<EventRow>,
    effects: BatchInserter<EffectRow>,
}

impl WarehouseLogger {
    pub fn new(client: clickhouse::Client) -> Self {
        Self {
            // Every consumed verdict lands here, so the batch should sit
            // near the per-second event rate.
            events: BatchInserter::new(client.clone(), "tern_events", 500, DEFAULT_MAX_PENDING_SENDS),
            // Only applied effects land here; small batches keep latency low.
            effects: BatchInserter::new(client, "tern_effects", 25, DEFAULT_MAX_PENDING_SENDS),
        }
    }

    pub async fn close(&self) {
        self.events.close().await;
        self.effects.close().await;
    }
}

#[async_trait]
impl EffectLogger for WarehouseLogger {
    fn name(&self) -> &'static str {
        "warehouse"
    }

    async fn log_event(&self, log: &EventLog) -> Result<()> {
        self.events.insert(EventRow {
            action_name: log.action_name.clone(),
            action_id: log.action_id,
            did: log.did.clone(),
            uri: log.uri.clone(),
            cid: log.cid.clone(),
            raw: log.raw.clone(),
            send_time: log.send_time.timestamp(),
            created_at: log.created_at.timestamp(),
        });
        Ok(())
    }

    async fn log_effect(&self, log: &EffectLog) -> Result<()> {
        self.effects.insert(EffectRow {
            action_name: log.action_name.clone(),
            action_id: log.action_id,
            subject: log.subject.clone(),
            kind: log.kind.clone(),
            rules: log.rules.clone(),
            comment: log.comment.clone(),
            label: log.label.clone(),
            tag: log.tag.clone(),
            email: log.email.clone(),
            created_at: log.created_at.timestamp(),
        });
        Ok(())
    }
}

/// Writes warehouse-flag effects to the tagged-posts table.
pub struct FlagClient {
    inserter: BatchInserter<FlagRow>,
}

impl FlagClient {
    pub fn new(client: clickhouse::Client) -> Self {
        Self {
            // Flags are rare; submit immediately.
            inserter: BatchInserter::new(client, "tagged_posts", 1, DEFAULT_MAX_PENDING_SENDS),
        }
    }

    /// Record a tag against a record subject.
    pub fn add_flag(&self, uri: &str, tag: &str) -> Result<()> {
        let aturi = AtUri::parse(uri)?;

        self.inserter.insert(FlagRow {
            uri: uri.to_string(),
            did: aturi.authority().to_string(),
            collection: aturi.collection.clone().unwrap_or_default(),
            rkey: aturi.rkey.clone().unwrap_or_default(),
            tag: tag.to_string(),
            created_at: Utc::now().timestamp(),
        });
        Ok(())
    }

    pub async fn close(&self) {
        self.inserter.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_queue_until_full() {
        let inserter: BatchInserter<FlagRow> =
            BatchInserter::new(clickhouse::Client::default(), "tagged_posts", 3, 10);

        let row = FlagRow {
            uri: "at://did:plc:abc/app.bsky.feed.post/3kfoo".to_string(),
            did: "did:plc:abc".to_string(),
            collection: "app.bsky.feed.post".to_string(),
            rkey: "3kfoo".to_string(),
            tag: "test".to_string(),
            created_at: 0,
        };

        inserter.insert(row.clone());
        inserter.insert(row.clone());
        assert_eq!(inserter.queue.lock().unwrap().len(), 2);
    }

    #[test]
    fn flag_rows_split_the_subject_uri() {
        let aturi = AtUri::parse("at://did:plc:abc/app.bsky.feed.post/3kfoo").unwrap();
        assert_eq!(aturi.authority(), "did:plc:abc");
        assert_eq!(aturi.collection.as_deref(), Some("app.bsky.feed.post"));
        assert_eq!(aturi.rkey.as_deref(), Some("3kfoo"));
    }

    #[test]
    fn zero_max_pending_uses_the_default() {
        let inserter: BatchInserter<FlagRow> =
            BatchInserter::new(clickhouse::Client::default(), "tagged_posts", 1, 0);
        assert_eq!(inserter.max_pending, DEFAULT_MAX_PENDING_SENDS);
    }
}
