//! Fan-out effect logging.
//!
//! The log manager multiplexes event and effect records across registered
//! sinks (warehouse batcher, chat webhook, structured stdout). Sink failures
//! are joined into a single error for the caller but never block the
//! consumer. At most one sink of a given name may be registered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use tern_core::AtUri;

use crate::error::{Error, Result};

/// One consumed verdict, logged once per event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub action_name: String,
    pub action_id: i64,
    pub did: String,
    pub uri: String,
    pub cid: String,
    /// The verdict, JSON-serialized.
    pub raw: String,
    pub send_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One successfully applied effect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectLog {
    pub action_name: String,
    pub action_id: i64,
    pub subject: String,
    pub kind: String,
    pub rules: String,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An effect-log sink.
#[async_trait]
pub trait EffectLogger: Send + Sync {
    fn name(&self) -> &'static str;
    async fn log_event(&self, log: &EventLog) -> Result<()>;
    async fn log_effect(&self, log: &EffectLog) -> Result<()>;
}

/// Composite logger with uniquely-named registered sinks.
#[derive(Default)]
pub struct LogManager {
    loggers: Vec<Arc<dyn EffectLogger>>,
}

impl LogManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_logger(&mut self, logger: Arc<dyn EffectLogger>) -> Result<()> {
        if self.loggers.iter().any(|l| l.name() == logger.name()) {
            return Err(Error::DuplicateLogger(logger.name()));
        }
        self.loggers.push(logger);
        Ok(())
    }

    pub async fn log_event(&self, log: &EventLog) -> Result<()> {
        let mut failures = Vec::new();
        for logger in &self.loggers {
            if let Err(e) = logger.log_event(log).await {
                failures.push(format!("{}: {}", logger.name(), e));
            }
        }
        join_failures(failures)
    }

    pub async fn log_effect(&self, log: &EffectLog) -> Result<()> {
        let mut failures = Vec::new();
        for logger in &self.loggers {
            if let Err(e) = logger.log_effect(log).await {
                failures.push(format!("{}: {}", logger.name(), e));
            }
        }
        join_failures(failures)
    }
}

fn join_failures(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::LoggerFailures(failures.join("; ")))
    }
}

/// Structured stdout sink.
pub struct TracingLogger;

#[async_trait]
impl EffectLogger for TracingLogger {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn log_event(&self, _log: &EventLog) -> Result<()> {
        Ok(())
    }

    async fn log_effect(&self, log: &EffectLog) -> Result<()> {
        tracing::info!(
            action_name = %log.action_name,
            action_id = log.action_id,
            subject = %log.subject,
            kind = %log.kind,
            rules = %log.rules,
            "processed effect"
        );
        Ok(())
    }
}

/// Chat-webhook sink: one post per applied effect with app and console links.
pub struct ChatLogger {
    http: reqwest::Client,
    webhook_url: String,
    console_url: String,
}

#[derive(Serialize)]
struct ChatMessage {
    text: String,
}

impl ChatLogger {
    pub fn new(webhook_url: impl Into<String>, console_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
            console_url: console_url.into(),
        }
    }

    fn format_message(&self, log: &EffectLog) -> Result<String> {
        let (app_url, console_url) = subject_links(&log.subject, &self.console_url)?;

        let mut msg = format!(
            "\nAction ID: {}\nAction Name: {}\nRules: {}\nCreated At: {}\nSubject: {}\nApp URL: {}\nConsole URL: {}\nComment: {}",
            log.action_id,
            log.action_name,
            log.rules,
            log.created_at.to_rfc3339(),
            log.subject,
            app_url.unwrap_or_default(),
            console_url,
            log.comment,
        );

        if let Some(label) = &log.label {
            msg.push_str(&format!("\nLabel: {}", label));
        }
        if let Some(tag) = &log.tag {
            msg.push_str(&format!("\nTag: {}", tag));
        }
        if let Some(email) = &log.email {
            msg.push_str(&format!("\nEmail: {}", email));
        }

        Ok(msg)
    }
}

#[async_trait]
impl EffectLogger for ChatLogger {
    fn name(&self) -> &'static str {
        "chat"
    }

    // Events are too chatty for the webhook; effects only.
    async fn log_event(&self, _log: &EventLog) -> Result<()> {
        Ok(())
    }

    async fn log_effect(&self, log: &EffectLog) -> Result<()> {
        let msg = self.format_message(log)?;
        let payload = ChatMessage {
            text: format!("```\n{}\n```", msg),
        };

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                status: response.status(),
                body: String::new(),
            });
        }
        Ok(())
    }
}

/// App-facing and console URLs for an effect subject.
fn subject_links(subject: &str, console_base: &str) -> Result<(Option<String>, String)> {
    if subject.starts_with("did:") {
        return Ok((
            Some(format!("https://bsky.app/profile/{}", subject)),
            format!("{}/repositories/{}", console_base, subject),
        ));
    }

    let aturi = AtUri::parse(subject)?;
    let did = aturi.authority();
    let collection = aturi.collection.as_deref().unwrap_or_default();
    let rkey = aturi.rkey.as_deref().unwrap_or_default();

    let app_url = match collection {
        "app.bsky.feed.post" => Some(format!("https://bsky.app/profile/{}/post/{}", did, rkey)),
        "app.bsky.actor.profile" => Some(format!("https://bsky.app/profile/{}", did)),
        "app.bsky.graph.list" => Some(format!("https://bsky.app/profile/{}/list/{}", did, rkey)),
        _ => None,
    };
    let console_url = format!(
        "{}/repositories/{}/{}/{}",
        console_base, did, collection, rkey
    );

    Ok((app_url, console_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingLogger {
        name: &'static str,
        effects: Mutex<usize>,
        fail: bool,
    }

    impl CountingLogger {
        fn new(name: &'static str, fail: bool) -> Self {
            Self {
                name,
                effects: Mutex::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl EffectLogger for CountingLogger {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn log_event(&self, _log: &EventLog) -> Result<()> {
            Ok(())
        }
        async fn log_effect(&self, _log: &EffectLog) -> Result<()> {
            *self.effects.lock().unwrap() += 1;
            if self.fail {
                Err(Error::Session("sink down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn effect_log() -> EffectLog {
        EffectLog {
            action_name: "app.bsky.feed.post#create".to_string(),
            action_id: 42,
            subject: "at://did:plc:abc/app.bsky.feed.post/3kfoo".to_string(),
            kind: "label".to_string(),
            rules: "R1,R2".to_string(),
            comment: "Actioned by rules R1,R2".to_string(),
            label: Some("spam".to_string()),
            tag: None,
            email: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_sink_names_are_rejected() {
        let mut manager = LogManager::new();
        manager
            .add_logger(Arc::new(CountingLogger::new("a", false)))
            .unwrap();
        assert!(matches!(
            manager.add_logger(Arc::new(CountingLogger::new("a", false))),
            Err(Error::DuplicateLogger("a"))
        ));
    }

    #[tokio::test]
    async fn sink_failures_join_but_do_not_block_other_sinks() {
        let failing = Arc::new(CountingLogger::new("failing", true));
        let healthy = Arc::new(CountingLogger::new("healthy", false));

        let mut manager = LogManager::new();
        manager.add_logger(failing.clone() as Arc<dyn EffectLogger>).unwrap();
        manager.add_logger(healthy.clone() as Arc<dyn EffectLogger>).unwrap();

        let err = manager.log_effect(&effect_log()).await.unwrap_err();
        assert!(matches!(err, Error::LoggerFailures(_)));
        assert!(err.to_string().contains("failing"));

        // Both sinks were still invoked.
        assert_eq!(*failing.effects.lock().unwrap(), 1);
        assert_eq!(*healthy.effects.lock().unwrap(), 1);
    }

    #[test]
    fn record_subjects_link_to_post_and_console() {
        let (app, console) = subject_links(
            "at://did:plc:abc/app.bsky.feed.post/3kfoo",
            "https://console.example.com",
        )
        .unwrap();
        assert_eq!(
            app.as_deref(),
            Some("https://bsky.app/profile/did:plc:abc/post/3kfoo")
        );
        assert_eq!(
            console,
            "https://console.example.com/repositories/did:plc:abc/app.bsky.feed.post/3kfoo"
        );
    }

    #[test]
    fn actor_subjects_link_to_profile() {
        let (app, console) =
            subject_links("did:plc:abc", "https://console.example.com").unwrap();
        assert_eq!(app.as_deref(), Some("https://bsky.app/profile/did:plc:abc"));
        assert_eq!(
            console,
            "https://console.example.com/repositories/did:plc:abc"
        );
    }

    #[test]
    fn chat_message_carries_label_line() {
        let logger = ChatLogger::new("https://hooks.example.com/x", "https://console.example.com");
        let msg = logger.format_message(&effect_log()).unwrap();
        assert!(msg.contains("Label: spam"));
        assert!(msg.contains("Rules: R1,R2"));
        assert!(!msg.contains("Tag:"));
    }
}
