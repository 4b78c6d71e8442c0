//! Typed, keyed bus producer.

use std::marker::PhantomData;
use std::time::Duration;

use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use serde::Serialize;

use crate::error::Result;

/// Producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub bootstrap_servers: Vec<String>,
    pub topic: String,
    /// Create the topic at startup if it does not exist.
    pub ensure_topic: bool,
    /// Partition count used when creating the topic.
    pub partitions: i32,
    /// Upper bound on a single message, applied to both the topic and the
    /// client, when set.
    pub max_message_bytes: Option<usize>,
}

impl ProducerConfig {
    pub fn new(bootstrap_servers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            bootstrap_servers,
            topic: topic.into(),
            ensure_topic: false,
            partitions: 1,
            max_message_bytes: None,
        }
    }

    pub fn ensure_topic(mut self, partitions: i32) -> Self {
        self.ensure_topic = true;
        self.partitions = partitions;
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = Some(bytes);
        self
    }
}

/// JSON-encoding producer for messages of type `T`, keyed by subject.
pub struct Producer<T> {
    inner: FutureProducer,
    topic: String,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> Producer<T> {
    /// Build the producer, optionally creating its topic.
    pub async fn new(config: ProducerConfig) -> Result<Self> {
        if config.ensure_topic {
            let max_bytes = config
                .max_message_bytes
                .map(|b| b.to_string());
            let mut topic_configs: Vec<(&str, &str)> = Vec::new();
            if let Some(ref b) = max_bytes {
                topic_configs.push(("max.message.bytes", b.as_str()));
            }
            super::ensure_topic(
                &config.bootstrap_servers,
                &config.topic,
                config.partitions,
                &topic_configs,
            )
            .await?;
        }

        let mut client_config = super::base_config(&config.bootstrap_servers);
        client_config
            .set("compression.type", "lz4")
            .set("linger.ms", "50");
        if let Some(bytes) = config.max_message_bytes {
            client_config.set("message.max.bytes", bytes.to_string());
        }

        let inner: FutureProducer = client_config.create()?;

        Ok(Self {
            inner,
            topic: config.topic,
            _marker: PhantomData,
        })
    }

    /// Produce one message keyed by `key`, waiting for broker acknowledgement.
    ///
    /// The send blocks while the client's in-flight queue is full, which is
    /// what throttles the upstream subscriber under load.
    pub async fn produce(&self, key: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);

        match self
            .inner
            .send(record, Timeout::After(Duration::from_secs(30)))
            .await
        {
            Ok(_) => Ok(()),
            Err((err, _)) => Err(err.into()),
        }
    }

    /// Flush any buffered messages. Called during shutdown.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.inner.flush(Timeout::After(timeout))?;
        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
