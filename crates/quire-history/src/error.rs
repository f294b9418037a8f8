//! Error types for revision log operations.

use thiserror::Error;

use crate::Revision;

/// Errors that can occur while building or slicing a revision log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// A bundle was appended at a revision other than the current end.
    ///
    /// Revisions must be contiguous; this is always an upstream bug and is
    /// never retried.
    #[error("out of order revision: expected {expected}, got {got}")]
    OutOfOrderRevision { expected: Revision, got: Revision },

    /// A requested range does not lie inside the log.
    #[error(
        "revision range [{requested_start}, {requested_end}) outside of log [{start}, {end})"
    )]
    RevisionOutOfRange {
        start: Revision,
        end: Revision,
        requested_start: Revision,
        requested_end: Revision,
    },

    /// Committing against this revision would move past `Revision::MAX`.
    #[error("revision counter exhausted at {0}")]
    RevisionOverflow(Revision),

    /// A document identifier failed validation.
    #[error("invalid document id: {0}")]
    InvalidDocumentId(String),
}
