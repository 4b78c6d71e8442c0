//! The verdict consumer.
//!
//! Each verdict is handled in its own task under a per-event budget. Effects
//! within one event are applied sequentially in list order; effects in
//! different events run concurrently. Destructive effect kinds pass through
//! the action memo before touching the moderation API.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;

use tern_core::bus::{Consumer, ConsumerConfig, StartOffset};
use tern_core::{EffectKind, ResultEvent, SubjectKind};

use crate::error::Result;
use crate::logmgr::{EffectLog, EventLog, LogManager};
use crate::memo::ActionMemo;
use crate::moderation::{ModToolMeta, ModerationApi};
use crate::warehouse::FlagClient;

/// Per-event application budget.
const EVENT_BUDGET: Duration = Duration::from_secs(15);

/// Effector configuration.
#[derive(Debug, Clone)]
pub struct EffectorArgs {
    pub bootstrap_servers: Vec<String>,
    pub input_topic: String,
    pub consumer_group: String,
}

/// The verdict applier.
#[derive(Clone)]
pub struct Effector {
    moderation: Arc<dyn ModerationApi>,
    memo: ActionMemo,
    log_manager: Arc<LogManager>,
    flags: Option<Arc<FlagClient>>,
}

impl Effector {
    pub fn new(
        moderation: Arc<dyn ModerationApi>,
        memo: ActionMemo,
        log_manager: Arc<LogManager>,
        flags: Option<Arc<FlagClient>>,
    ) -> Self {
        Self {
            moderation,
            memo,
            log_manager,
            flags,
        }
    }

    /// Consume verdicts until the shutdown token fires.
    pub async fn run(&self, args: &EffectorArgs, shutdown: &CancellationToken) -> Result<()> {
        let consumer = Consumer::<ResultEvent>::new(
            ConsumerConfig::new(
                args.bootstrap_servers.clone(),
                args.input_topic.clone(),
                args.consumer_group.clone(),
            )
            .offset(StartOffset::End),
        )?;

        tracing::info!(input_topic = %args.input_topic, "effector consuming");

        consumer
            .run(shutdown, |event| self.spawn_event(event))
            .await?;
        Ok(())
    }

    /// Hand the verdict to its own task so slow events do not block the
    /// consumer; the task runs under the per-event budget.
    async fn spawn_event(&self, event: ResultEvent) -> Result<()> {
        let this = self.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(EVENT_BUDGET, this.handle_event(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "error handling event"),
                Err(_) => tracing::warn!("event handling exceeded budget"),
            }
        });
        Ok(())
    }

    /// Apply one verdict's effects in list order.
    pub async fn handle_event(&self, event: ResultEvent) -> Result<()> {
        counter!("events_received", "action_name" => event.action_name.clone()).increment(1);

        match serde_json::to_string(&event) {
            Ok(raw) => {
                let log = EventLog {
                    action_name: event.action_name.clone(),
                    action_id: event.action_id,
                    did: event.did.clone(),
                    uri: event.uri.clone().unwrap_or_default(),
                    cid: event.cid.clone().unwrap_or_default(),
                    raw,
                    send_time: event.send_time,
                    created_at: Utc::now(),
                };
                if let Err(e) = self.log_manager.log_event(&log).await {
                    tracing::error!(error = %e, "failed to log event");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize event for logging"),
        }

        self.apply_labels(&event).await;
        self.apply_tags(&event).await;
        self.apply_takedowns(&event).await;
        self.apply_reports(&event).await;
        self.apply_comments(&event).await;
        self.apply_escalations(&event).await;
        self.apply_acknowledgements(&event).await;
        self.apply_emails(&event).await;
        self.apply_warehouse_flags(&event).await;

        counter!("events_processed", "action_name" => event.action_name.clone(), "status" => "ok")
            .increment(1);
        Ok(())
    }

    async fn apply_labels(&self, event: &ResultEvent) {
        for effect in &event.labels {
            let rules = effect.rules.join(",");
            let comment = format!("Actioned by rules {}\n\n{}", rules, effect.comment);
            let remove = effect.effect_kind == EffectKind::Remove;

            let Some(subject) = self.subject_for(event, effect.subject_kind, "label") else {
                continue;
            };

            if self
                .memo
                .check_has_actioned(&subject, &rules, effect.expiration_in_hours)
            {
                tracing::info!(action_id = event.action_id, "skipping label effect");
                count_request("label", effect.subject_kind, "skipped");
                continue;
            }

            let result = match effect.subject_kind {
                SubjectKind::Actor => {
                    self.moderation
                        .label_actor(
                            &event.did,
                            meta(&rules),
                            effect.label,
                            &comment,
                            effect.email,
                            effect.expiration_in_hours,
                            remove,
                        )
                        .await
                }
                SubjectKind::Record => {
                    self.moderation
                        .label_record(
                            &subject,
                            event.cid.as_deref().unwrap_or_default(),
                            meta(&rules),
                            effect.label,
                            &comment,
                            effect.email,
                            effect.expiration_in_hours,
                            remove,
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    count_request("label", effect.subject_kind, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject,
                        kind: "label".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: Some(effect.label.as_str().to_string()),
                        tag: None,
                        email: None,
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("label", effect.subject_kind, "error");
                    tracing::error!(error = %e, "error processing label effect");
                }
            }
        }
    }

    async fn apply_tags(&self, event: &ResultEvent) {
        for effect in &event.tags {
            let rules = effect.rules.join(",");
            let mut comment = format!("Actioned by rules {}", rules);
            if let Some(extra) = &effect.comment {
                comment = format!("{}\n\n{}", comment, extra);
            }
            let remove = effect.effect_kind == EffectKind::Remove;

            let Some(subject) = self.subject_for(event, effect.subject_kind, "tag") else {
                continue;
            };

            if self.memo.check_has_actioned(&subject, &rules, None) {
                tracing::info!(action_id = event.action_id, "skipping tag effect");
                count_request("tag", effect.subject_kind, "skipped");
                continue;
            }

            let result = match effect.subject_kind {
                SubjectKind::Actor => {
                    self.moderation
                        .tag_actor(
                            &event.did,
                            meta(&rules),
                            &effect.tag,
                            effect.comment.as_deref(),
                            remove,
                        )
                        .await
                }
                SubjectKind::Record => {
                    self.moderation
                        .tag_record(
                            &subject,
                            event.cid.as_deref().unwrap_or_default(),
                            meta(&rules),
                            &effect.tag,
                            effect.comment.as_deref(),
                            remove,
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    count_request("tag", effect.subject_kind, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject,
                        kind: "tag".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: None,
                        tag: Some(effect.tag.clone()),
                        email: None,
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("tag", effect.subject_kind, "error");
                    tracing::error!(error = %e, "error processing tag effect");
                }
            }
        }
    }

    async fn apply_takedowns(&self, event: &ResultEvent) {
        for effect in &event.takedowns {
            let rules = effect.rules.join(",");
            let comment = format!("Actioned by rules {}\n\n{}", rules, effect.comment);
            let reverse = effect.effect_kind == EffectKind::Remove;

            let Some(subject) = self.subject_for(event, effect.subject_kind, "takedown") else {
                continue;
            };

            if self.memo.check_has_actioned(&subject, &rules, None) {
                tracing::info!(action_id = event.action_id, "skipping takedown effect");
                count_request("takedown", effect.subject_kind, "skipped");
                continue;
            }

            let result = match effect.subject_kind {
                SubjectKind::Actor => {
                    self.moderation
                        .takedown_actor(&event.did, meta(&rules), &comment, effect.email, reverse)
                        .await
                }
                SubjectKind::Record => {
                    self.moderation
                        .takedown_record(
                            &subject,
                            event.cid.as_deref().unwrap_or_default(),
                            meta(&rules),
                            &comment,
                            effect.email,
                            reverse,
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    count_request("takedown", effect.subject_kind, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject,
                        kind: "takedown".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: None,
                        tag: None,
                        email: None,
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("takedown", effect.subject_kind, "error");
                    tracing::error!(error = %e, "error processing takedown effect");
                }
            }
        }
    }

    async fn apply_reports(&self, event: &ResultEvent) {
        for effect in &event.reports {
            let rules = effect.rules.join(",");
            let comment = format!("Actioned by rules {}\n\n{}", rules, effect.comment);

            let Some(subject) = self.subject_for(event, effect.subject_kind, "report") else {
                continue;
            };

            // Duplicate reports are wanted: each one bumps console review
            // priority, so the memo gate is skipped on purpose.
            let result = match effect.subject_kind {
                SubjectKind::Actor => {
                    self.moderation
                        .report_actor(
                            &event.did,
                            meta(&rules),
                            effect.report_kind,
                            &comment,
                            effect.priority_score,
                        )
                        .await
                }
                SubjectKind::Record => {
                    self.moderation
                        .report_record(
                            &subject,
                            event.cid.as_deref().unwrap_or_default(),
                            meta(&rules),
                            effect.report_kind,
                            &comment,
                            effect.priority_score,
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    count_request("report", effect.subject_kind, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject,
                        kind: "report".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: None,
                        tag: None,
                        email: None,
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("report", effect.subject_kind, "error");
                    tracing::error!(error = %e, "error processing report effect");
                }
            }
        }
    }

    async fn apply_comments(&self, event: &ResultEvent) {
        for effect in &event.comments {
            let rules = effect.rules.join(",");
            let comment = format!("Actioned by rules {}\n\n{}", rules, effect.comment);

            let Some(subject) = self.subject_for(event, effect.subject_kind, "comment") else {
                continue;
            };

            if self.memo.check_has_actioned(&subject, &rules, None) {
                tracing::info!(action_id = event.action_id, "skipping comment effect");
                count_request("comment", effect.subject_kind, "skipped");
                continue;
            }

            let result = match effect.subject_kind {
                SubjectKind::Actor => {
                    self.moderation
                        .comment_actor(&event.did, meta(&rules), &comment)
                        .await
                }
                SubjectKind::Record => {
                    self.moderation
                        .comment_record(
                            &subject,
                            event.cid.as_deref().unwrap_or_default(),
                            meta(&rules),
                            &comment,
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    count_request("comment", effect.subject_kind, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject,
                        kind: "comment".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: None,
                        tag: None,
                        email: None,
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("comment", effect.subject_kind, "error");
                    tracing::error!(error = %e, "error processing comment effect");
                }
            }
        }
    }

    async fn apply_escalations(&self, event: &ResultEvent) {
        for effect in &event.escalations {
            let rules = effect.rules.join(",");
            let mut comment = format!("Actioned by rules {}", rules);
            if let Some(extra) = &effect.comment {
                comment = format!("{}\n\n{}", comment, extra);
            }

            let Some(subject) = self.subject_for(event, effect.subject_kind, "escalation") else {
                continue;
            };

            // Escalations are never deduplicated.
            let result = match effect.subject_kind {
                SubjectKind::Actor => {
                    self.moderation
                        .escalate_actor(&event.did, meta(&rules), effect.comment.as_deref())
                        .await
                }
                SubjectKind::Record => {
                    self.moderation
                        .escalate_record(
                            &subject,
                            event.cid.as_deref().unwrap_or_default(),
                            meta(&rules),
                            effect.comment.as_deref(),
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    count_request("escalation", effect.subject_kind, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject,
                        kind: "escalation".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: None,
                        tag: None,
                        email: None,
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("escalation", effect.subject_kind, "error");
                    tracing::error!(error = %e, "error processing escalation effect");
                }
            }
        }
    }

    async fn apply_acknowledgements(&self, event: &ResultEvent) {
        for effect in &event.acknowledgements {
            let rules = effect.rules.join(",");
            let mut comment = format!("Actioned by rules {}", rules);
            if let Some(extra) = &effect.comment {
                comment = format!("{}\n\n{}", comment, extra);
            }

            let Some(subject) = self.subject_for(event, effect.subject_kind, "acknowledgement")
            else {
                continue;
            };

            // Acknowledgements are never deduplicated.
            let result = match effect.subject_kind {
                SubjectKind::Actor => {
                    self.moderation
                        .acknowledge_actor(&event.did, meta(&rules), effect.comment.as_deref())
                        .await
                }
                SubjectKind::Record => {
                    self.moderation
                        .acknowledge_record(
                            &subject,
                            event.cid.as_deref().unwrap_or_default(),
                            meta(&rules),
                            effect.comment.as_deref(),
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    count_request("acknowledgement", effect.subject_kind, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject,
                        kind: "acknowledgement".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: None,
                        tag: None,
                        email: None,
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("acknowledgement", effect.subject_kind, "error");
                    tracing::error!(error = %e, "error processing acknowledgement effect");
                }
            }
        }
    }

    async fn apply_emails(&self, event: &ResultEvent) {
        for effect in &event.emails {
            let rules = effect.rules.join(",");
            let mut comment = format!("Actioned by rules {}", rules);
            if let Some(extra) = &effect.comment {
                comment = format!("{}\n\n{}", comment, extra);
            }

            // Emails are never deduplicated.
            match self.moderation.send_email(&event.did, effect.email).await {
                Ok(()) => {
                    count_request("email", SubjectKind::Actor, "ok");
                    self.log_effect(EffectLog {
                        action_name: event.action_name.clone(),
                        action_id: event.action_id,
                        subject: event.did.clone(),
                        kind: "email".to_string(),
                        rules: rules.clone(),
                        comment,
                        label: None,
                        tag: None,
                        email: Some(effect.email.as_str().to_string()),
                        created_at: Utc::now(),
                    })
                    .await;
                }
                Err(e) => {
                    count_request("email", SubjectKind::Actor, "error");
                    tracing::error!(error = %e, "error processing email effect");
                }
            }
        }
    }

    async fn apply_warehouse_flags(&self, event: &ResultEvent) {
        let Some(flags) = &self.flags else {
            return;
        };

        for effect in &event.warehouse_flags {
            // Flags only make sense against records.
            if effect.subject_kind != SubjectKind::Record {
                continue;
            }
            let Some(uri) = event.uri.as_deref() else {
                continue;
            };

            if let Err(e) = flags.add_flag(uri, &effect.tag) {
                tracing::error!(error = %e, "error processing warehouse flag effect");
                continue;
            }

            self.log_effect(EffectLog {
                action_name: event.action_name.clone(),
                action_id: event.action_id,
                subject: uri.to_string(),
                kind: "warehouse-flag".to_string(),
                rules: effect.rules.join(","),
                comment: String::new(),
                label: None,
                tag: Some(effect.tag.clone()),
                email: None,
                created_at: Utc::now(),
            })
            .await;
        }
    }

    /// The memo/log subject for an effect: the DID for actors, the URI for
    /// records. Record effects without a URI are dropped with a warning.
    fn subject_for(
        &self,
        event: &ResultEvent,
        kind: SubjectKind,
        effect: &'static str,
    ) -> Option<String> {
        match kind {
            SubjectKind::Actor => Some(event.did.clone()),
            SubjectKind::Record => match &event.uri {
                Some(uri) => Some(uri.clone()),
                None => {
                    tracing::warn!(
                        action_id = event.action_id,
                        effect,
                        "record effect without a subject uri, dropping"
                    );
                    None
                }
            },
        }
    }

    async fn log_effect(&self, log: EffectLog) {
        if let Err(e) = self.log_manager.log_effect(&log).await {
            tracing::error!(error = %e, "failed to log effect");
        }
    }
}

fn meta(rules: &str) -> ModToolMeta {
    ModToolMeta {
        rules: rules.to_string(),
    }
}

fn count_request(kind: &'static str, subject: SubjectKind, status: &'static str) {
    let subject = match subject {
        SubjectKind::Actor => "actor",
        SubjectKind::Record => "record",
    };
    counter!("ozone_requests", "type" => kind, "kind" => subject, "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::InMemoryStore;
    use crate::moderation::clamp_label_duration;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tern_core::{
        AcknowledgeEffect, EmailTemplate, Label, LabelEffect, ReportEffect, ReportKind,
        ResultEvent,
    };

    /// Records every moderation call for assertions.
    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingApi {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModerationApi for RecordingApi {
        async fn takedown_actor(
            &self,
            did: &str,
            _meta: ModToolMeta,
            _comment: &str,
            _email: Option<EmailTemplate>,
            reverse: bool,
        ) -> crate::Result<()> {
            self.record(format!("takedown-actor:{}:{}", did, reverse));
            Ok(())
        }
        async fn takedown_record(
            &self,
            uri: &str,
            _cid: &str,
            _meta: ModToolMeta,
            _comment: &str,
            _email: Option<EmailTemplate>,
            _reverse: bool,
        ) -> crate::Result<()> {
            self.record(format!("takedown-record:{}", uri));
            Ok(())
        }
        async fn label_actor(
            &self,
            did: &str,
            _meta: ModToolMeta,
            label: Label,
            _comment: &str,
            _email: Option<EmailTemplate>,
            duration_in_hours: Option<i64>,
            _remove: bool,
        ) -> crate::Result<()> {
            let clamped = clamp_label_duration(label, duration_in_hours);
            self.record(format!(
                "label-actor:{}:{}:{:?}",
                did,
                label.as_str(),
                clamped
            ));
            Ok(())
        }
        async fn label_record(
            &self,
            uri: &str,
            _cid: &str,
            _meta: ModToolMeta,
            label: Label,
            _comment: &str,
            _email: Option<EmailTemplate>,
            _duration_in_hours: Option<i64>,
            _remove: bool,
        ) -> crate::Result<()> {
            self.record(format!("label-record:{}:{}", uri, label.as_str()));
            Ok(())
        }
        async fn tag_actor(
            &self,
            did: &str,
            _meta: ModToolMeta,
            tag: &str,
            _comment: Option<&str>,
            _remove: bool,
        ) -> crate::Result<()> {
            self.record(format!("tag-actor:{}:{}", did, tag));
            Ok(())
        }
        async fn tag_record(
            &self,
            uri: &str,
            _cid: &str,
            _meta: ModToolMeta,
            tag: &str,
            _comment: Option<&str>,
            _remove: bool,
        ) -> crate::Result<()> {
            self.record(format!("tag-record:{}:{}", uri, tag));
            Ok(())
        }
        async fn comment_actor(
            &self,
            did: &str,
            _meta: ModToolMeta,
            _comment: &str,
        ) -> crate::Result<()> {
            self.record(format!("comment-actor:{}", did));
            Ok(())
        }
        async fn comment_record(
            &self,
            uri: &str,
            _cid: &str,
            _meta: ModToolMeta,
            _comment: &str,
        ) -> crate::Result<()> {
            self.record(format!("comment-record:{}", uri));
            Ok(())
        }
        async fn report_actor(
            &self,
            did: &str,
            _meta: ModToolMeta,
            kind: ReportKind,
            _comment: &str,
            _priority_score: Option<i64>,
        ) -> crate::Result<()> {
            self.record(format!("report-actor:{}:{}", did, kind.as_reason()));
            Ok(())
        }
        async fn report_record(
            &self,
            uri: &str,
            _cid: &str,
            _meta: ModToolMeta,
            _kind: ReportKind,
            _comment: &str,
            _priority_score: Option<i64>,
        ) -> crate::Result<()> {
            self.record(format!("report-record:{}", uri));
            Ok(())
        }
        async fn escalate_actor(
            &self,
            did: &str,
            _meta: ModToolMeta,
            _comment: Option<&str>,
        ) -> crate::Result<()> {
            self.record(format!("escalate-actor:{}", did));
            Ok(())
        }
        async fn escalate_record(
            &self,
            uri: &str,
            _cid: &str,
            _meta: ModToolMeta,
            _comment: Option<&str>,
        ) -> crate::Result<()> {
            self.record(format!("escalate-record:{}", uri));
            Ok(())
        }
        async fn acknowledge_actor(
            &self,
            did: &str,
            _meta: ModToolMeta,
            _comment: Option<&str>,
        ) -> crate::Result<()> {
            self.record(format!("acknowledge-actor:{}", did));
            Ok(())
        }
        async fn acknowledge_record(
            &self,
            uri: &str,
            _cid: &str,
            _meta: ModToolMeta,
            _comment: Option<&str>,
        ) -> crate::Result<()> {
            self.record(format!("acknowledge-record:{}", uri));
            Ok(())
        }
        async fn send_email(&self, did: &str, template: EmailTemplate) -> crate::Result<()> {
            self.record(format!("email:{}:{}", did, template.as_str()));
            Ok(())
        }
    }

    fn effector_with(api: Arc<RecordingApi>) -> Effector {
        Effector::new(
            api,
            ActionMemo::new(
                Arc::new(InMemoryStore::new(Duration::from_secs(60))),
                Duration::from_secs(60),
            ),
            Arc::new(LogManager::new()),
            None,
        )
    }

    fn verdict() -> ResultEvent {
        ResultEvent {
            action_name: "app.bsky.feed.post#create".to_string(),
            action_id: 1,
            send_time: Utc::now(),
            did: "did:plc:abc".to_string(),
            uri: Some("at://did:plc:abc/app.bsky.feed.post/3kfoo".to_string()),
            cid: Some("bafyrei".to_string()),
            labels: vec![],
            tags: vec![],
            takedowns: vec![],
            reports: vec![],
            comments: vec![],
            escalations: vec![],
            acknowledgements: vec![],
            emails: vec![],
            warehouse_flags: vec![],
        }
    }

    fn label_effect(rules: Vec<&str>) -> LabelEffect {
        LabelEffect {
            subject_kind: SubjectKind::Actor,
            effect_kind: EffectKind::Add,
            label: Label::Spam,
            expiration_in_hours: None,
            comment: String::new(),
            email: None,
            rules: rules.into_iter().map(str::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn identical_label_is_applied_once() {
        let api = Arc::new(RecordingApi::default());
        let effector = effector_with(api.clone());

        let mut event = verdict();
        event.labels = vec![label_effect(vec!["R1"])];

        effector.handle_event(event.clone()).await.unwrap();
        effector.handle_event(event).await.unwrap();

        let calls = api.calls();
        assert_eq!(
            calls,
            vec!["label-actor:did:plc:abc:spam:None".to_string()],
            "second identical label must be suppressed by the memo"
        );
    }

    #[tokio::test]
    async fn different_rules_are_not_suppressed() {
        let api = Arc::new(RecordingApi::default());
        let effector = effector_with(api.clone());

        let mut first = verdict();
        first.labels = vec![label_effect(vec!["R1"])];
        let mut second = verdict();
        second.labels = vec![label_effect(vec!["R2"])];

        effector.handle_event(first).await.unwrap();
        effector.handle_event(second).await.unwrap();

        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn reports_are_never_suppressed() {
        let api = Arc::new(RecordingApi::default());
        let effector = effector_with(api.clone());

        let mut event = verdict();
        event.reports = vec![ReportEffect {
            subject_kind: SubjectKind::Actor,
            report_kind: ReportKind::Spam,
            comment: String::new(),
            priority_score: None,
            rules: vec!["R1".to_string()],
        }];

        effector.handle_event(event.clone()).await.unwrap();
        effector.handle_event(event).await.unwrap();

        assert_eq!(api.calls().len(), 2, "reports are excluded from the memo");
    }

    #[tokio::test]
    async fn acknowledgements_use_the_acknowledge_call_for_records() {
        let api = Arc::new(RecordingApi::default());
        let effector = effector_with(api.clone());

        let mut event = verdict();
        event.acknowledgements = vec![AcknowledgeEffect {
            subject_kind: SubjectKind::Record,
            comment: None,
            rules: vec!["R1".to_string()],
        }];

        effector.handle_event(event.clone()).await.unwrap();
        effector.handle_event(event).await.unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 2, "acknowledgements are excluded from the memo");
        assert!(calls.iter().all(|c| c.starts_with("acknowledge-record:")));
    }

    #[tokio::test]
    async fn needs_review_duration_reaching_the_api_is_clamped() {
        let api = Arc::new(RecordingApi::default());
        let effector = effector_with(api.clone());

        let mut event = verdict();
        let mut effect = label_effect(vec!["R1"]);
        effect.label = Label::NeedsReview;
        effect.expiration_in_hours = Some(9999);
        event.labels = vec![effect];

        effector.handle_event(event).await.unwrap();

        assert_eq!(
            api.calls(),
            vec!["label-actor:did:plc:abc:needs-review:Some(168)".to_string()]
        );
    }

    #[tokio::test]
    async fn record_effects_without_a_uri_are_dropped() {
        let api = Arc::new(RecordingApi::default());
        let effector = effector_with(api.clone());

        let mut event = verdict();
        event.uri = None;
        let mut effect = label_effect(vec!["R1"]);
        effect.subject_kind = SubjectKind::Record;
        event.labels = vec![effect];

        effector.handle_event(event).await.unwrap();
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn same_rule_on_actor_and_record_are_distinct_actions() {
        let api = Arc::new(RecordingApi::default());
        let effector = effector_with(api.clone());

        let mut event = verdict();
        let actor = label_effect(vec!["R1"]);
        let mut record = label_effect(vec!["R1"]);
        record.subject_kind = SubjectKind::Record;
        event.labels = vec![actor, record];

        effector.handle_event(event).await.unwrap();
        assert_eq!(api.calls().len(), 2, "actor and record subjects memo separately");
    }
}
