//! Session-managed moderation API client.
//!
//! All mutating operations go through the console's `emitEvent` RPC with a
//! typed event union, the acting account as `createdBy`, and structured
//! modTool provenance carrying the rule set that fired. Short-lived access
//! credentials are refreshed under a single-flight lock when they come
//! within five minutes of expiry.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use tern_core::{AtUri, EmailTemplate, Label, ReportKind};

use crate::error::{Error, Result};

/// Name attached to every action as modTool provenance.
pub const CLIENT_NAME: &str = "tern-effector";

/// `needs-review` labels never last longer than a week.
pub const NEEDS_REVIEW_MAX_HOURS: i64 = 7 * 24;

/// Refresh the session when the access credential has less than this left.
const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Structured provenance attached to each moderation action.
#[derive(Debug, Clone, Serialize)]
pub struct ModToolMeta {
    pub rules: String,
}

/// Capability seam over the moderation console. Every operation is dual for
/// actor subjects (by DID) and record subjects (by URI + CID).
#[async_trait]
pub trait ModerationApi: Send + Sync {
    async fn takedown_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        comment: &str,
        email: Option<EmailTemplate>,
        reverse: bool,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn takedown_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: &str,
        email: Option<EmailTemplate>,
        reverse: bool,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn label_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        label: Label,
        comment: &str,
        email: Option<EmailTemplate>,
        duration_in_hours: Option<i64>,
        remove: bool,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn label_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        label: Label,
        comment: &str,
        email: Option<EmailTemplate>,
        duration_in_hours: Option<i64>,
        remove: bool,
    ) -> Result<()>;

    async fn tag_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        tag: &str,
        comment: Option<&str>,
        remove: bool,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn tag_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        tag: &str,
        comment: Option<&str>,
        remove: bool,
    ) -> Result<()>;

    async fn comment_actor(&self, did: &str, meta: ModToolMeta, comment: &str) -> Result<()>;

    async fn comment_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: &str,
    ) -> Result<()>;

    async fn report_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        kind: ReportKind,
        comment: &str,
        priority_score: Option<i64>,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn report_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        kind: ReportKind,
        comment: &str,
        priority_score: Option<i64>,
    ) -> Result<()>;

    async fn escalate_actor(&self, did: &str, meta: ModToolMeta, comment: Option<&str>)
    -> Result<()>;

    async fn escalate_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: Option<&str>,
    ) -> Result<()>;

    async fn acknowledge_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        comment: Option<&str>,
    ) -> Result<()>;

    async fn acknowledge_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: Option<&str>,
    ) -> Result<()>;

    async fn send_email(&self, did: &str, template: EmailTemplate) -> Result<()>;
}

/// Access + refresh credential pair from the console's PDS.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
}

#[derive(Debug, Clone)]
pub struct OzoneClientArgs {
    pub pds_host: String,
    pub identifier: String,
    pub password: String,
    pub proxy_did: String,
    pub is_production: bool,
}

/// The concrete moderation console client.
pub struct OzoneClient {
    http: reqwest::Client,
    pds_host: String,
    proxy_did: String,
    is_production: bool,
    session: RwLock<Session>,
    refresh_lock: Mutex<()>,
}

#[derive(Serialize)]
#[serde(tag = "$type")]
enum ModEvent {
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventTakedown",
        rename_all = "camelCase"
    )]
    Takedown {
        comment: String,
        acknowledge_account_subjects: bool,
    },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventReverseTakedown",
        rename_all = "camelCase"
    )]
    ReverseTakedown { comment: String },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventLabel",
        rename_all = "camelCase"
    )]
    Label {
        create_label_vals: Vec<String>,
        negate_label_vals: Vec<String>,
        comment: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_in_hours: Option<i64>,
    },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventTag",
        rename_all = "camelCase"
    )]
    Tag {
        add: Vec<String>,
        remove: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventComment",
        rename_all = "camelCase"
    )]
    Comment { comment: String },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventReport",
        rename_all = "camelCase"
    )]
    Report {
        report_type: String,
        comment: String,
    },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventPriorityScore",
        rename_all = "camelCase"
    )]
    PriorityScore { comment: String, score: i64 },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventEscalate",
        rename_all = "camelCase"
    )]
    Escalate {
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    #[serde(
        rename = "tools.ozone.moderation.defs#modEventAcknowledge",
        rename_all = "camelCase"
    )]
    Acknowledge {
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(tag = "$type")]
enum Subject {
    #[serde(rename = "com.atproto.admin.defs#repoRef")]
    Repo { did: String },
    #[serde(rename = "com.atproto.repo.strongRef")]
    Record { uri: String, cid: String },
}

#[derive(Serialize)]
struct ModTool {
    name: &'static str,
    meta: ModToolMeta,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmitEventBody {
    created_by: String,
    event: ModEvent,
    subject: Subject,
    mod_tool: ModTool,
}

impl OzoneClient {
    /// Authenticate against the console's PDS and store the credential pair.
    pub async fn login(args: OzoneClientArgs) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");

        #[derive(Serialize)]
        struct CreateSession<'a> {
            identifier: &'a str,
            password: &'a str,
        }

        let response = http
            .post(format!(
                "{}/xrpc/com.atproto.server.createSession",
                args.pds_host
            ))
            .json(&CreateSession {
                identifier: &args.identifier,
                password: &args.password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Session(format!(
                "createSession returned {}",
                response.status()
            )));
        }
        let session: Session = response.json().await?;

        Ok(Self {
            http,
            pds_host: args.pds_host,
            proxy_did: args.proxy_did,
            is_production: args.is_production,
            session: RwLock::new(session),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Current session, refreshed under a single-flight lock when the access
    /// credential is close to expiry. Readers always see a coherent pair.
    async fn session(&self) -> Result<Session> {
        let current = self.session.read().await.clone();
        if !needs_refresh(&current.access_jwt) {
            return Ok(current);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        let current = self.session.read().await.clone();
        if !needs_refresh(&current.access_jwt) {
            return Ok(current);
        }

        tracing::info!("refreshing moderation session...");

        let response = self
            .http
            .post(format!(
                "{}/xrpc/com.atproto.server.refreshSession",
                self.pds_host
            ))
            .bearer_auth(&current.refresh_jwt)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Session(format!(
                "refreshSession returned {}",
                response.status()
            )));
        }
        let refreshed: Session = response.json().await?;

        *self.session.write().await = refreshed.clone();
        tracing::info!("moderation session refreshed");

        Ok(refreshed)
    }

    async fn emit(&self, event: ModEvent, subject: Subject, meta: ModToolMeta) -> Result<()> {
        let session = self.session().await?;

        let body = EmitEventBody {
            created_by: session.did.clone(),
            event,
            subject,
            mod_tool: ModTool {
                name: CLIENT_NAME,
                meta,
            },
        };

        let response = self
            .http
            .post(format!(
                "{}/xrpc/tools.ozone.moderation.emitEvent",
                self.pds_host
            ))
            .bearer_auth(&session.access_jwt)
            .header(
                "atproto-proxy",
                format!("{}#atproto_labeler", self.proxy_did),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedStatus { status, body });
        }
        Ok(())
    }
}

/// Clamp a `needs-review` duration to the policy maximum. Other labels pass
/// through untouched.
pub fn clamp_label_duration(label: Label, duration_in_hours: Option<i64>) -> Option<i64> {
    if label != Label::NeedsReview {
        return duration_in_hours;
    }
    match duration_in_hours {
        Some(hours) if hours <= NEEDS_REVIEW_MAX_HOURS => Some(hours),
        _ => Some(NEEDS_REVIEW_MAX_HOURS),
    }
}

fn needs_refresh(access_jwt: &str) -> bool {
    match jwt_expires_at(access_jwt) {
        Some(expiry) => {
            let remaining = expiry - Utc::now();
            remaining.to_std().unwrap_or(Duration::ZERO) < REFRESH_WINDOW
        }
        // An unreadable credential is treated as expiring.
        None => true,
    }
}

/// Peek the `exp` claim of a JWT without verifying it.
fn jwt_expires_at(jwt: &str) -> Option<DateTime<Utc>> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_f64()?;
    DateTime::from_timestamp(exp as i64, 0)
}

fn count_effect(kind: &'static str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!("effects_processed", "type" => kind, "status" => status).increment(1);
}

#[async_trait]
impl ModerationApi for OzoneClient {
    async fn takedown_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        comment: &str,
        email: Option<EmailTemplate>,
        reverse: bool,
    ) -> Result<()> {
        let result = async {
            if self.is_production {
                let event = if reverse {
                    ModEvent::ReverseTakedown {
                        comment: comment.to_string(),
                    }
                } else {
                    ModEvent::Takedown {
                        comment: comment.to_string(),
                        acknowledge_account_subjects: true,
                    }
                };
                self.emit(
                    event,
                    Subject::Repo {
                        did: did.to_string(),
                    },
                    meta,
                )
                .await?;

                if let Some(template) = email {
                    self.send_email(did, template).await?;
                }
            }
            Ok(())
        }
        .await;
        count_effect("takedown-actor", result.is_ok());
        result
    }

    async fn takedown_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: &str,
        email: Option<EmailTemplate>,
        reverse: bool,
    ) -> Result<()> {
        let result = async {
            let aturi = AtUri::parse(uri)?;
            if self.is_production {
                let event = if reverse {
                    ModEvent::ReverseTakedown {
                        comment: comment.to_string(),
                    }
                } else {
                    ModEvent::Takedown {
                        comment: comment.to_string(),
                        acknowledge_account_subjects: true,
                    }
                };
                self.emit(
                    event,
                    Subject::Record {
                        uri: uri.to_string(),
                        cid: cid.to_string(),
                    },
                    meta,
                )
                .await?;

                if let Some(template) = email {
                    self.send_email(aturi.authority(), template).await?;
                }
            }
            Ok(())
        }
        .await;
        count_effect("takedown-record", result.is_ok());
        result
    }

    async fn label_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        label: Label,
        comment: &str,
        email: Option<EmailTemplate>,
        duration_in_hours: Option<i64>,
        remove: bool,
    ) -> Result<()> {
        let result = async {
            if self.is_production {
                let duration_in_hours = clamp_label_duration(label, duration_in_hours);
                let (create, negate) = label_vals(label, remove);
                self.emit(
                    ModEvent::Label {
                        create_label_vals: create,
                        negate_label_vals: negate,
                        comment: comment.to_string(),
                        duration_in_hours,
                    },
                    Subject::Repo {
                        did: did.to_string(),
                    },
                    meta,
                )
                .await?;

                if let Some(template) = email {
                    self.send_email(did, template).await?;
                }
            }
            Ok(())
        }
        .await;
        count_effect("label-actor", result.is_ok());
        result
    }

    async fn label_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        label: Label,
        comment: &str,
        email: Option<EmailTemplate>,
        duration_in_hours: Option<i64>,
        remove: bool,
    ) -> Result<()> {
        let result = async {
            let aturi = AtUri::parse(uri)?;
            if self.is_production {
                let duration_in_hours = clamp_label_duration(label, duration_in_hours);
                let (create, negate) = label_vals(label, remove);
                self.emit(
                    ModEvent::Label {
                        create_label_vals: create,
                        negate_label_vals: negate,
                        comment: comment.to_string(),
                        duration_in_hours,
                    },
                    Subject::Record {
                        uri: uri.to_string(),
                        cid: cid.to_string(),
                    },
                    meta,
                )
                .await?;

                if let Some(template) = email {
                    self.send_email(aturi.authority(), template).await?;
                }
            }
            Ok(())
        }
        .await;
        count_effect("label-record", result.is_ok());
        result
    }

    async fn tag_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        tag: &str,
        comment: Option<&str>,
        remove: bool,
    ) -> Result<()> {
        let result = async {
            if self.is_production {
                let (add, remove_vals) = tag_vals(tag, remove);
                self.emit(
                    ModEvent::Tag {
                        add,
                        remove: remove_vals,
                        comment: comment.map(str::to_string),
                    },
                    Subject::Repo {
                        did: did.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("tag-actor", result.is_ok());
        result
    }

    async fn tag_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        tag: &str,
        comment: Option<&str>,
        remove: bool,
    ) -> Result<()> {
        let result = async {
            AtUri::parse(uri)?;
            if self.is_production {
                let (add, remove_vals) = tag_vals(tag, remove);
                self.emit(
                    ModEvent::Tag {
                        add,
                        remove: remove_vals,
                        comment: comment.map(str::to_string),
                    },
                    Subject::Record {
                        uri: uri.to_string(),
                        cid: cid.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("tag-record", result.is_ok());
        result
    }

    async fn comment_actor(&self, did: &str, meta: ModToolMeta, comment: &str) -> Result<()> {
        let result = async {
            if self.is_production {
                self.emit(
                    ModEvent::Comment {
                        comment: comment.to_string(),
                    },
                    Subject::Repo {
                        did: did.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("comment-actor", result.is_ok());
        result
    }

    async fn comment_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: &str,
    ) -> Result<()> {
        let result = async {
            AtUri::parse(uri)?;
            if self.is_production {
                self.emit(
                    ModEvent::Comment {
                        comment: comment.to_string(),
                    },
                    Subject::Record {
                        uri: uri.to_string(),
                        cid: cid.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("comment-record", result.is_ok());
        result
    }

    async fn report_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        kind: ReportKind,
        comment: &str,
        priority_score: Option<i64>,
    ) -> Result<()> {
        let result = async {
            if self.is_production {
                self.emit(
                    ModEvent::Report {
                        report_type: kind.as_reason().to_string(),
                        comment: comment.to_string(),
                    },
                    Subject::Repo {
                        did: did.to_string(),
                    },
                    meta.clone(),
                )
                .await?;

                if let Some(score) = priority_score {
                    self.emit(
                        ModEvent::PriorityScore {
                            comment: comment.to_string(),
                            score,
                        },
                        Subject::Repo {
                            did: did.to_string(),
                        },
                        meta,
                    )
                    .await?;
                }
            }
            Ok(())
        }
        .await;
        count_effect("report-actor", result.is_ok());
        result
    }

    async fn report_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        kind: ReportKind,
        comment: &str,
        priority_score: Option<i64>,
    ) -> Result<()> {
        let result = async {
            AtUri::parse(uri)?;
            if self.is_production {
                self.emit(
                    ModEvent::Report {
                        report_type: kind.as_reason().to_string(),
                        comment: comment.to_string(),
                    },
                    Subject::Record {
                        uri: uri.to_string(),
                        cid: cid.to_string(),
                    },
                    meta.clone(),
                )
                .await?;

                if let Some(score) = priority_score {
                    self.emit(
                        ModEvent::PriorityScore {
                            comment: comment.to_string(),
                            score,
                        },
                        Subject::Record {
                            uri: uri.to_string(),
                            cid: cid.to_string(),
                        },
                        meta,
                    )
                    .await?;
                }
            }
            Ok(())
        }
        .await;
        count_effect("report-record", result.is_ok());
        result
    }

    async fn escalate_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        comment: Option<&str>,
    ) -> Result<()> {
        let result = async {
            if self.is_production {
                self.emit(
                    ModEvent::Escalate {
                        comment: comment.map(str::to_string),
                    },
                    Subject::Repo {
                        did: did.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("escalate-actor", result.is_ok());
        result
    }

    async fn escalate_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: Option<&str>,
    ) -> Result<()> {
        let result = async {
            AtUri::parse(uri)?;
            if self.is_production {
                self.emit(
                    ModEvent::Escalate {
                        comment: comment.map(str::to_string),
                    },
                    Subject::Record {
                        uri: uri.to_string(),
                        cid: cid.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("escalate-record", result.is_ok());
        result
    }

    async fn acknowledge_actor(
        &self,
        did: &str,
        meta: ModToolMeta,
        comment: Option<&str>,
    ) -> Result<()> {
        let result = async {
            if self.is_production {
                self.emit(
                    ModEvent::Acknowledge {
                        comment: comment.map(str::to_string),
                    },
                    Subject::Repo {
                        did: did.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("acknowledge-actor", result.is_ok());
        result
    }

    async fn acknowledge_record(
        &self,
        uri: &str,
        cid: &str,
        meta: ModToolMeta,
        comment: Option<&str>,
    ) -> Result<()> {
        let result = async {
            AtUri::parse(uri)?;
            if self.is_production {
                self.emit(
                    ModEvent::Acknowledge {
                        comment: comment.map(str::to_string),
                    },
                    Subject::Record {
                        uri: uri.to_string(),
                        cid: cid.to_string(),
                    },
                    meta,
                )
                .await?;
            }
            Ok(())
        }
        .await;
        count_effect("acknowledge-record", result.is_ok());
        result
    }

    async fn send_email(&self, did: &str, template: EmailTemplate) -> Result<()> {
        // TODO: wire communication templates through the console's email
        // event once template ids are exposed to this client.
        tracing::debug!(did, template = template.as_str(), "email effect recorded");
        count_effect("email", true);
        Ok(())
    }
}

fn label_vals(label: Label, remove: bool) -> (Vec<String>, Vec<String>) {
    let val = label.as_str().to_string();
    if remove {
        (vec![], vec![val])
    } else {
        (vec![val], vec![])
    }
}

fn tag_vals(tag: &str, remove: bool) -> (Vec<String>, Vec<String>) {
    let val = tag.to_string();
    if remove {
        (vec![], vec![val])
    } else {
        (vec![val], vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_review_duration_is_clamped() {
        assert_eq!(
            clamp_label_duration(Label::NeedsReview, Some(9999)),
            Some(NEEDS_REVIEW_MAX_HOURS)
        );
        assert_eq!(
            clamp_label_duration(Label::NeedsReview, None),
            Some(NEEDS_REVIEW_MAX_HOURS)
        );
        assert_eq!(
            clamp_label_duration(Label::NeedsReview, Some(24)),
            Some(24)
        );
    }

    #[test]
    fn other_labels_keep_their_duration() {
        assert_eq!(clamp_label_duration(Label::Spam, Some(9999)), Some(9999));
        assert_eq!(clamp_label_duration(Label::Spam, None), None);
    }

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&serde_json::json!({ "exp": exp })).unwrap());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn jwt_expiry_is_peeked_without_verification() {
        let exp = Utc::now().timestamp() + 3600;
        let jwt = jwt_with_exp(exp);
        assert_eq!(jwt_expires_at(&jwt).unwrap().timestamp(), exp);
    }

    #[test]
    fn fresh_credentials_do_not_refresh() {
        let jwt = jwt_with_exp(Utc::now().timestamp() + 3600);
        assert!(!needs_refresh(&jwt));
    }

    #[test]
    fn near_expiry_credentials_refresh() {
        let jwt = jwt_with_exp(Utc::now().timestamp() + 60);
        assert!(needs_refresh(&jwt));

        let expired = jwt_with_exp(Utc::now().timestamp() - 60);
        assert!(needs_refresh(&expired));
    }

    #[test]
    fn garbage_credentials_refresh() {
        assert!(needs_refresh("not-a-jwt"));
    }

    #[test]
    fn mod_events_serialize_as_tagged_unions() {
        let event = ModEvent::Label {
            create_label_vals: vec!["spam".to_string()],
            negate_label_vals: vec![],
            comment: "Actioned by rules R1".to_string(),
            duration_in_hours: Some(24),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["$type"], "tools.ozone.moderation.defs#modEventLabel");
        assert_eq!(json["createLabelVals"][0], "spam");
        assert_eq!(json["durationInHours"], 24);

        let subject = Subject::Record {
            uri: "at://did:plc:abc/app.bsky.feed.post/3kfoo".to_string(),
            cid: "bafyrei".to_string(),
        };
        let json = serde_json::to_value(&subject).unwrap();
        assert_eq!(json["$type"], "com.atproto.repo.strongRef");
    }
}
