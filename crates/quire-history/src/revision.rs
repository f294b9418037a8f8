//! Revision counters and per-transition metadata.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A monotonically increasing document version.
///
/// Revision `r` is both an index into a [`RevisionLog`](crate::RevisionLog)
/// and the optimistic version stamp a client holds while editing.
#[derive(
    Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The revision every document starts at.
    pub const ZERO: Revision = Revision(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The highest representable revision. A log can end here but never
    /// commit against it.
    pub const MAX: Revision = Revision(u64::MAX);

    /// The revision after this one, or `None` at [`Revision::MAX`].
    pub const fn next(self) -> Option<Self> {
        self.advance(1)
    }

    /// Number of revisions from `self` up to `later`, or `None` if `later`
    /// comes first.
    pub fn distance(self, later: Revision) -> Option<u64> {
        later.0.checked_sub(self.0)
    }

    /// Revision `n` steps after this one, or `None` on overflow.
    pub const fn advance(self, n: u64) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Who produced a transition and when.
///
/// Metadata stored at revision `r` describes the bundle that moves the
/// document from `r` to `r + 1`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    /// Author principal (e.g. "user:amy").
    pub author: String,
    /// Commit time in Unix millis.
    pub timestamp_ms: u64,
    /// Free-form commit comment.
    #[serde(default)]
    pub comment: String,
}

impl ChangeMetadata {
    /// Metadata stamped with the current wall-clock time.
    pub fn now(author: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            author: author.into(),
            timestamp_ms,
            comment: String::new(),
        }
    }

    pub fn at(author: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            author: author.into(),
            timestamp_ms,
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}
