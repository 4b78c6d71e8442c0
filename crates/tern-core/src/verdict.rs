//! Rules-engine verdict model.
//!
//! A verdict names a subject (an actor DID, or a record URI + content-address)
//! and carries ordered lists of effects of each kind. Effect lists are applied
//! in order by the effector; there is no ordering across kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an effect targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectKind {
    /// A decentralized identifier.
    Actor,
    /// An authoring DID + collection + record key, addressed by URI + CID.
    Record,
}

/// Whether an effect adds or removes its label/tag/takedown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectKind {
    Add,
    Remove,
}

/// Closed label vocabulary understood by the moderation console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Hide,
    Warn,
    Spam,
    Rude,
    Porn,
    Sexual,
    Misleading,
    NeedsReview,
}

impl Label {
    /// Console-side label value. Total on the enum.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Hide => "!hide",
            Label::Warn => "!warn",
            Label::Spam => "spam",
            Label::Rude => "rude",
            Label::Porn => "porn",
            Label::Sexual => "sexual",
            Label::Misleading => "misleading",
            Label::NeedsReview => "needs-review",
        }
    }

    pub const ALL: [Label; 8] = [
        Label::Hide,
        Label::Warn,
        Label::Spam,
        Label::Rude,
        Label::Porn,
        Label::Sexual,
        Label::Misleading,
        Label::NeedsReview,
    ];
}

/// Closed report-reason vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportKind {
    Spam,
    Violation,
    Misleading,
    Sexual,
    Rude,
    Other,
}

impl ReportKind {
    /// Moderation reason token. Total on the enum.
    pub fn as_reason(&self) -> &'static str {
        match self {
            ReportKind::Spam => "com.atproto.moderation.defs#reasonSpam",
            ReportKind::Violation => "com.atproto.moderation.defs#reasonViolation",
            ReportKind::Misleading => "com.atproto.moderation.defs#reasonMisleading",
            ReportKind::Sexual => "com.atproto.moderation.defs#reasonSexual",
            ReportKind::Rude => "com.atproto.moderation.defs#reasonRude",
            ReportKind::Other => "com.atproto.moderation.defs#reasonOther",
        }
    }

    pub const ALL: [ReportKind; 6] = [
        ReportKind::Spam,
        ReportKind::Violation,
        ReportKind::Misleading,
        ReportKind::Sexual,
        ReportKind::Rude,
        ReportKind::Other,
    ];
}

/// Closed email template vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailTemplate {
    Warning,
    TakedownNotice,
    AppealReceived,
}

impl EmailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailTemplate::Warning => "warning",
            EmailTemplate::TakedownNotice => "takedown-notice",
            EmailTemplate::AppealReceived => "appeal-received",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEffect {
    pub subject_kind: SubjectKind,
    pub effect_kind: EffectKind,
    pub label: Label,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_in_hours: Option<i64>,
    #[serde(default)]
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailTemplate>,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEffect {
    pub subject_kind: SubjectKind,
    pub effect_kind: EffectKind,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakedownEffect {
    pub subject_kind: SubjectKind,
    pub effect_kind: EffectKind,
    #[serde(default)]
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailTemplate>,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEffect {
    pub subject_kind: SubjectKind,
    pub report_kind: ReportKind,
    #[serde(default)]
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<i64>,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEffect {
    pub subject_kind: SubjectKind,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateEffect {
    pub subject_kind: SubjectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeEffect {
    pub subject_kind: SubjectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEffect {
    pub email: EmailTemplate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Tag + subject sent to the analytics warehouse only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseFlagEffect {
    pub subject_kind: SubjectKind,
    pub tag: String,
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Effector input: one rules-engine verdict with ordered effect lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    pub action_name: String,
    pub action_id: i64,
    pub send_time: DateTime<Utc>,
    pub did: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelEffect>,
    #[serde(default)]
    pub tags: Vec<TagEffect>,
    #[serde(default)]
    pub takedowns: Vec<TakedownEffect>,
    #[serde(default)]
    pub reports: Vec<ReportEffect>,
    #[serde(default)]
    pub comments: Vec<CommentEffect>,
    #[serde(default)]
    pub escalations: Vec<EscalateEffect>,
    #[serde(default)]
    pub acknowledgements: Vec<AcknowledgeEffect>,
    #[serde(default)]
    pub emails: Vec<EmailEffect>,
    #[serde(default)]
    pub warehouse_flags: Vec<WarehouseFlagEffect>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_vocabulary_is_total_and_distinct() {
        let mut seen = std::collections::HashSet::new();
        for label in Label::ALL {
            assert!(seen.insert(label.as_str()), "duplicate label string");
        }
        assert!(seen.contains("!hide"));
        assert!(seen.contains("!warn"));
        assert!(seen.contains("needs-review"));
    }

    #[test]
    fn report_reasons_are_namespaced_tokens() {
        for kind in ReportKind::ALL {
            assert!(kind.as_reason().starts_with("com.atproto.moderation.defs#reason"));
        }
        assert_eq!(
            ReportKind::Spam.as_reason(),
            "com.atproto.moderation.defs#reasonSpam"
        );
    }

    #[test]
    fn verdict_deserializes_with_missing_effect_lists() {
        let json = serde_json::json!({
            "actionName": "app.bsky.feed.post#create",
            "actionId": 17,
            "sendTime": "2024-06-01T00:00:00Z",
            "did": "did:plc:abc",
            "labels": [{
                "subjectKind": "ACTOR",
                "effectKind": "ADD",
                "label": "SPAM",
                "rules": ["R1"]
            }]
        });

        let evt: ResultEvent = serde_json::from_value(json).unwrap();
        assert_eq!(evt.labels.len(), 1);
        assert_eq!(evt.labels[0].label, Label::Spam);
        assert!(evt.tags.is_empty());
        assert!(evt.reports.is_empty());
        assert!(evt.uri.is_none());
    }
}
