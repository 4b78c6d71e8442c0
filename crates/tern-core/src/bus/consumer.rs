//! Typed bus consumer.

use std::future::Future;
use std::marker::PhantomData;

use rdkafka::Message;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Only new messages (live tail).
    End,
    /// Everything retained on the topic.
    Beginning,
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub bootstrap_servers: Vec<String>,
    pub topic: String,
    pub group: String,
    pub offset: StartOffset,
}

impl ConsumerConfig {
    pub fn new(
        bootstrap_servers: Vec<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            bootstrap_servers,
            topic: topic.into(),
            group: group.into(),
            offset: StartOffset::End,
        }
    }

    pub fn offset(mut self, offset: StartOffset) -> Self {
        self.offset = offset;
        self
    }
}

/// JSON-decoding consumer for messages of type `T`.
///
/// Messages that fail to decode are logged, counted, and skipped; a bad
/// message must not block the stream.
pub struct Consumer<T> {
    inner: StreamConsumer,
    topic: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Consumer<T> {
    pub fn new(config: ConsumerConfig) -> Result<Self> {
        let mut client_config = super::base_config(&config.bootstrap_servers);
        client_config
            .set("group.id", &config.group)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("enable.partition.eof", "false")
            .set(
                "auto.offset.reset",
                match config.offset {
                    StartOffset::End => "latest",
                    StartOffset::Beginning => "earliest",
                },
            );

        let inner: StreamConsumer = client_config.create()?;
        inner.subscribe(&[&config.topic])?;

        Ok(Self {
            inner,
            topic: config.topic,
            _marker: PhantomData,
        })
    }

    /// Consume until the shutdown token fires or the underlying client fails.
    ///
    /// Handler errors are logged and do not stop the loop; per-event failures
    /// must never kill the stream.
    pub async fn run<F, Fut, E>(&self, shutdown: &CancellationToken, handler: F) -> Result<()>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(topic = %self.topic, "consumer shutting down");
                    return Ok(());
                }
                res = self.inner.recv() => res?,
            };

            let Some(payload) = message.payload() else {
                tracing::warn!(topic = %self.topic, "message with empty payload, skipping");
                continue;
            };

            let decoded: T = match serde_json::from_slice(payload) {
                Ok(v) => v,
                Err(e) => {
                    metrics::counter!("bus_decode_failures", "topic" => self.topic.clone())
                        .increment(1);
                    tracing::warn!(topic = %self.topic, error = %e, "failed to decode message, skipping");
                    continue;
                }
            };

            if let Err(e) = handler(decoded).await {
                tracing::error!(topic = %self.topic, error = %e, "handler error");
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
