//! Reference change payload: axiom/annotation/import edits on a document.
//!
//! This is the payload the admin tooling and tests use. Servers embedding
//! quire with their own operation type implement [`Change`] for it instead.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::change::{Change, Merged};

/// One edit to a document.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edit {
    AddAxiom(String),
    RemoveAxiom(String),
    AddAnnotation(String),
    RemoveAnnotation(String),
    AddImport(String),
    RemoveImport(String),
    /// Replace the document's identity. Only the last one survives.
    SetDocumentIri(String),
}

/// Which collection an edit touches.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EditKind {
    Axiom,
    Annotation,
    Import,
    Identity,
}

/// The logical target of an [`Edit`].
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum EditTarget {
    Member(EditKind, String),
    Identity,
}

impl Edit {
    pub fn kind(&self) -> EditKind {
        match self {
            Edit::AddAxiom(_) | Edit::RemoveAxiom(_) => EditKind::Axiom,
            Edit::AddAnnotation(_) | Edit::RemoveAnnotation(_) => EditKind::Annotation,
            Edit::AddImport(_) | Edit::RemoveImport(_) => EditKind::Import,
            Edit::SetDocumentIri(_) => EditKind::Identity,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Edit::AddAxiom(v)
            | Edit::RemoveAxiom(v)
            | Edit::AddAnnotation(v)
            | Edit::RemoveAnnotation(v)
            | Edit::AddImport(v)
            | Edit::RemoveImport(v)
            | Edit::SetDocumentIri(v) => v,
        }
    }

    pub fn is_addition(&self) -> bool {
        matches!(
            self,
            Edit::AddAxiom(_) | Edit::AddAnnotation(_) | Edit::AddImport(_)
        )
    }

    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            Edit::RemoveAxiom(_) | Edit::RemoveAnnotation(_) | Edit::RemoveImport(_)
        )
    }
}

impl Change for Edit {
    type Target = EditTarget;
    type Context = DocumentState;

    fn target(&self) -> EditTarget {
        match self {
            Edit::SetDocumentIri(_) => EditTarget::Identity,
            other => EditTarget::Member(other.kind(), other.value().to_string()),
        }
    }

    fn merge(prior: Self, next: Self) -> Merged<Self> {
        if let (Edit::SetDocumentIri(_), Edit::SetDocumentIri(_)) = (&prior, &next) {
            return Merged::Net(next);
        }
        match (prior.is_addition(), next.is_addition()) {
            // add-then-add or remove-then-remove: same net effect as one
            (true, true) | (false, false) => Merged::Net(prior),
            // add-then-remove or remove-then-add
            _ => Merged::Cancelled,
        }
    }

    fn apply_to(&self, doc: &mut DocumentState) {
        match self {
            Edit::AddAxiom(v) => {
                doc.axioms.insert(v.clone());
            }
            Edit::RemoveAxiom(v) => {
                doc.axioms.remove(v);
            }
            Edit::AddAnnotation(v) => {
                doc.annotations.insert(v.clone());
            }
            Edit::RemoveAnnotation(v) => {
                doc.annotations.remove(v);
            }
            Edit::AddImport(v) => {
                doc.imports.insert(v.clone());
            }
            Edit::RemoveImport(v) => {
                doc.imports.remove(v);
            }
            Edit::SetDocumentIri(v) => doc.iri = Some(v.clone()),
        }
    }
}

/// Materialized document content that [`Edit`]s apply to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    pub iri: Option<String>,
    pub axioms: BTreeSet<String>,
    pub annotations: BTreeSet<String>,
    pub imports: BTreeSet<String>,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }
}
