//! Document identifiers.
//!
//! A `DocumentId` names one document's persisted history. It is a relative,
//! slash-separated name such as `projects/pizza`; storage backends decide how
//! that maps onto files (the file backend appends `.history`). Ordering only
//! exists so that maintenance sweeps iterate deterministically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::HistoryError;

/// Stable, ordered identifier for one document's revision history.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Validate and wrap a document name.
    ///
    /// Rejects empty names, absolute paths, `.`/`..` segments, empty
    /// segments, backslashes and NUL bytes so that a name can never escape
    /// the storage root.
    pub fn new(name: impl Into<String>) -> Result<Self, HistoryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(HistoryError::InvalidDocumentId("empty name".into()));
        }
        if name.starts_with('/') {
            return Err(HistoryError::InvalidDocumentId(format!("{name}: absolute path")));
        }
        if name.contains('\\') || name.contains('\0') {
            return Err(HistoryError::InvalidDocumentId(format!(
                "{name}: forbidden character"
            )));
        }
        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(HistoryError::InvalidDocumentId(format!(
                    "{name}: bad segment {segment:?}"
                )));
            }
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment, for log lines.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = HistoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}
