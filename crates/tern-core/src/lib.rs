//! Core types and shared utilities for the Tern moderation pipeline.
//!
//! This crate provides:
//! - The event data model shared across the pipeline stages (firehose events,
//!   enriched events, rules-engine envelopes, verdicts)
//! - Typed Kafka producer/consumer/cursor wrappers
//! - AT-URI parsing
//! - Perceptual-hash encoding helpers
//! - Prometheus metrics helpers
//! - A token-bucket rate limiter used by every external client
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────┐
//! │   firehose   │  (relay WebSocket, CAR-encoded repo commits)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │  converter   │  decode + validate records, emit FirehoseEvent
//! └──────┬───────┘
//!        ▼  bus (keyed by DID)
//! ┌──────────────┐
//! │   enricher   │  fan out to enrichment services, emit RulesInputEvent
//! └──────┬───────┘
//!        ▼  bus
//! ┌──────────────┐
//! │ rules engine │  (external)
//! └──────┬───────┘
//!        ▼  bus
//! ┌──────────────┐
//! │   effector   │  apply verdicts to the moderation console
//! └──────────────┘
//! ```

pub mod aturi;
pub mod bus;
pub mod error;
pub mod event;
pub mod limiter;
pub mod metrics;
pub mod pdq;
pub mod verdict;

pub use aturi::AtUri;
pub use error::{Error, Result};
pub use event::{
    Commit, CommitOperation, EnrichedEvent, EventKind, FirehoseEvent, ImageResults,
    RulesInputEvent, RulesInputEventData,
};
pub use limiter::TokenBucket;
pub use verdict::{
    AcknowledgeEffect, CommentEffect, EffectKind, EmailEffect, EmailTemplate, EscalateEffect,
    Label, LabelEffect, ReportEffect, ReportKind, ResultEvent, SubjectKind, TagEffect,
    TakedownEffect, WarehouseFlagEffect,
};
