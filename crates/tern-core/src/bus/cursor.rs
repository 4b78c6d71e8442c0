//! Bus-backed cursor persistence.
//!
//! The converter checkpoints its firehose position as JSON records on a
//! dedicated compacted topic, keyed by the cursor name. The final save before
//! exit carries `saved_on_exit = true`, which tells the next run that no gap
//! was left open.

use std::time::Duration;

use rdkafka::Message;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A persisted firehose position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub sequence: i64,
    /// Set on the final flush before process exit.
    #[serde(default)]
    pub saved_on_exit: bool,
}

/// Pick the cursor to resume from.
///
/// Prefers the most recent entry matching `is_final` (normally
/// `saved_on_exit`); falls back to the most recent entry of any kind. Entries
/// must be given in topic order, oldest first.
pub fn select_resume_cursor<I, F>(entries: I, is_final: F) -> Option<Cursor>
where
    I: IntoIterator<Item = Cursor>,
    F: Fn(&Cursor) -> bool,
{
    let mut latest = None;
    let mut latest_final = None;
    for cursor in entries {
        if is_final(&cursor) {
            latest_final = Some(cursor);
        }
        latest = Some(cursor);
    }
    latest_final.or(latest)
}

/// Reads and writes [`Cursor`] records on a dedicated bus topic.
pub struct CursorStore {
    producer: FutureProducer,
    bootstrap_servers: Vec<String>,
    topic: String,
}

impl CursorStore {
    /// Open (and if needed create) the cursor topic.
    pub async fn new(bootstrap_servers: Vec<String>, name: impl Into<String>) -> Result<Self> {
        let topic = name.into();

        super::ensure_topic(
            &bootstrap_servers,
            &topic,
            1,
            &[("cleanup.policy", "compact")],
        )
        .await?;

        let producer: FutureProducer = super::base_config(&bootstrap_servers).create()?;

        Ok(Self {
            producer,
            bootstrap_servers,
            topic,
        })
    }

    /// Persist a cursor record.
    pub async fn save(&self, cursor: &Cursor) -> Result<()> {
        let payload = serde_json::to_vec(cursor)?;
        let record = FutureRecord::to(&self.topic)
            .key(self.topic.as_str())
            .payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(10)))
            .await
        {
            Ok(_) => Ok(()),
            Err((err, _)) => Err(err.into()),
        }
    }

    /// Load the cursor to resume from, preferring the most recent
    /// `saved_on_exit` entry. Returns `None` when the topic is empty.
    pub async fn load(&self) -> Result<Option<Cursor>> {
        let mut config = super::base_config(&self.bootstrap_servers);
        config
            .set(
                "group.id",
                format!("{}-loader-{}", self.topic, std::process::id()),
            )
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");
        let consumer: StreamConsumer = config.create()?;

        let (low, high) =
            consumer.fetch_watermarks(&self.topic, 0, Timeout::After(Duration::from_secs(10)))?;
        if high <= low {
            return Ok(None);
        }

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&self.topic, 0, Offset::Offset(low))?;
        consumer.assign(&assignment)?;

        let mut entries = Vec::new();
        loop {
            let message = match tokio::time::timeout(Duration::from_secs(10), consumer.recv()).await
            {
                Ok(res) => res?,
                Err(_) => break,
            };

            if let Some(payload) = message.payload() {
                match serde_json::from_slice::<Cursor>(payload) {
                    Ok(cursor) => entries.push(cursor),
                    Err(e) => {
                        tracing::warn!(topic = %self.topic, error = %e, "skipping undecodable cursor record");
                    }
                }
            }

            if message.offset() >= high - 1 {
                break;
            }
        }

        Ok(select_resume_cursor(entries, |c| c.saved_on_exit))
    }

    /// Flush pending cursor writes.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(Timeout::After(timeout))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(sequence: i64, saved_on_exit: bool) -> Cursor {
        Cursor {
            sequence,
            saved_on_exit,
        }
    }

    #[test]
    fn prefers_latest_final_save() {
        let picked = select_resume_cursor(
            vec![cursor(10, false), cursor(20, true), cursor(30, false)],
            |c| c.saved_on_exit,
        );
        assert_eq!(picked, Some(cursor(20, true)));
    }

    #[test]
    fn falls_back_to_latest_entry() {
        let picked = select_resume_cursor(vec![cursor(10, false), cursor(25, false)], |c| {
            c.saved_on_exit
        });
        assert_eq!(picked, Some(cursor(25, false)));
    }

    #[test]
    fn empty_topic_yields_none() {
        let picked = select_resume_cursor(std::iter::empty(), |c| c.saved_on_exit);
        assert_eq!(picked, None);
    }

    #[test]
    fn cursor_round_trips_through_json() {
        let c = cursor(1000, true);
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("savedOnExit"));
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
