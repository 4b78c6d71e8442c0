//! Effector: applies rules-engine verdicts as moderation actions.
//!
//! The effector consumes verdict events, dispatches each effect through the
//! moderation client, and appends an effect record to every configured
//! analytics sink. Destructive effect kinds (label, tag, takedown, comment)
//! are deduplicated across replicas by a shared TTL memo cache; reports,
//! escalations, acknowledgements, and emails are deliberately excluded from
//! memoization.
//!
//! # Modules
//!
//! - [`moderation`] - session-managed moderation API client
//! - [`memo`] - distributed action-memoization cache
//! - [`logmgr`] - fan-out effect logger (warehouse, chat webhook, stdout)
//! - [`warehouse`] - batched analytics inserter
//! - [`effector`] - the verdict consumer

pub mod effector;
pub mod error;
pub mod logmgr;
pub mod memo;
pub mod moderation;
pub mod warehouse;

pub use effector::{Effector, EffectorArgs};
pub use error::{Error, Result};
pub use logmgr::{EffectLog, EffectLogger, EventLog, LogManager};
pub use memo::{ActionMemo, InMemoryStore, MemcachedStore, MemoStore};
pub use moderation::{ModToolMeta, ModerationApi, OzoneClient, OzoneClientArgs};
pub use warehouse::{BatchInserter, FlagClient, WarehouseLogger};
