//! Typed Kafka wrappers used by every pipeline stage.
//!
//! Messages are JSON-encoded and keyed by subject DID so the bus preserves
//! per-subject ordering. The [`cursor`] module persists consumer-group
//! resume points on a dedicated compacted topic.

pub mod consumer;
pub mod cursor;
pub mod producer;

pub use consumer::{Consumer, ConsumerConfig, StartOffset};
pub use cursor::{Cursor, CursorStore, select_resume_cursor};
pub use producer::{Producer, ProducerConfig};

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::types::RDKafkaErrorCode;

use crate::error::Result;

fn base_config(bootstrap_servers: &[String]) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", bootstrap_servers.join(","));
    config
}

/// Create a topic if it does not already exist.
async fn ensure_topic(
    bootstrap_servers: &[String],
    topic: &str,
    partitions: i32,
    configs: &[(&str, &str)],
) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = base_config(bootstrap_servers).create()?;

    let mut new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
    for &(k, v) in configs {
        new_topic = new_topic.set(k, v);
    }

    let results = admin
        .create_topics(&[new_topic], &AdminOptions::new())
        .await?;

    for result in results {
        match result {
            Ok(name) => tracing::info!("created topic {}", name),
            Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
            Err((name, code)) => {
                tracing::warn!("failed to create topic {}: {}", name, code);
            }
        }
    }

    Ok(())
}
