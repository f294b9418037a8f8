//! Revision-indexed change histories for quire documents.
//!
//! A document's history is a [`RevisionLog`]: an append-only list of change
//! bundles, one per revision, each annotated with [`ChangeMetadata`]. The
//! change payload is opaque to this crate; anything implementing [`Change`]
//! can be logged, minimized, and replayed.
//!
//! # Replay Semantics
//!
//! - **Raw**: [`RevisionLog::revisions_list`] returns every bundle as it was
//!   committed, for audit and diagnostics
//! - **Minimal**: [`RevisionLog::changes`] collapses the whole log to one net
//!   change per target, so replay order no longer matters
//!
//! [`Edit`] is a ready-made payload for axiom/annotation/import documents.

mod change;
mod edit;
mod error;
pub mod ids;
mod log;
mod revision;

pub use change::{Change, Merged, minimize};
pub use edit::{DocumentState, Edit, EditKind, EditTarget};
pub use error::HistoryError;
pub use ids::DocumentId;
pub use log::{ChangeBundleRef, RevisionLog};
pub use revision::{ChangeMetadata, Revision};

/// File suffix for persisted histories.
pub const HISTORY_EXTENSION: &str = "history";

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
