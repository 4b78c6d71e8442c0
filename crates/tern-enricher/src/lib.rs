//! Enricher: bus consumer that fans each commit out to enrichment services.
//!
//! For every input commit the enricher concurrently fetches identity context
//! (DID document, audit log), the moderation-repo view, the appview profile,
//! and, per image blob referenced by the record, a set of image signals
//! (prescreen, classifier, OCR, perceptual hash, abuse match). The joined
//! result is wrapped into a rules-engine input envelope and re-emitted keyed
//! by subject DID.
//!
//! Every client is optional: an unconfigured service simply produces no
//! sub-result, and a failing one records an `error` field instead of failing
//! the event.

pub mod clients;
pub mod enricher;
pub mod error;
pub mod images;

pub use enricher::{Clients, Enricher, EnricherArgs};
pub use error::{Error, Result};
pub use images::{BlobRef, find_blobs};
