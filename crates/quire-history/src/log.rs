//! Revision-indexed change log for one document.
//!
//! A `RevisionLog` covers the half-open range `[start, end)`. The bundle
//! stored at revision `r` moves the document from `r` to `r + 1`, so a log
//! that starts at zero and holds three bundles has its document at `r3`.
//!
//! # Invariants
//!
//! - `metadata` has exactly one entry for every `r` in `[start, end)`
//! - bundles are append-only; nothing is mutated or removed once added
//! - [`RevisionLog::changes`] is minimal: one net change per target

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::{Change, minimize};
use crate::{ChangeMetadata, HistoryError, Revision};

/// Append-only history of change bundles between two revisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "C: Change"))]
pub struct RevisionLog<C> {
    start: Revision,
    metadata: BTreeMap<Revision, ChangeMetadata>,
    revisions: Vec<Vec<C>>,
}

/// Borrowed view of one bundle.
#[derive(Debug, Clone, Copy)]
pub struct ChangeBundleRef<'a, C> {
    /// Revision the bundle was committed against.
    pub revision: Revision,
    pub metadata: &'a ChangeMetadata,
    pub changes: &'a [C],
}

impl<C: Change> Default for RevisionLog<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Change> RevisionLog<C> {
    /// An empty log at revision zero.
    pub fn new() -> Self {
        Self::starting_at(Revision::ZERO)
    }

    /// An empty log whose first bundle will be committed against `start`.
    pub fn starting_at(start: Revision) -> Self {
        Self {
            start,
            metadata: BTreeMap::new(),
            revisions: Vec::new(),
        }
    }

    pub fn start_revision(&self) -> Revision {
        self.start
    }

    /// The revision the document is at; exclusive upper bound of the log.
    pub fn end_revision(&self) -> Revision {
        // appends and decoding both keep start + len in range
        self.start
            .advance(self.revisions.len() as u64)
            .unwrap_or(Revision::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Number of bundles.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Append a bundle committed against `revision`.
    ///
    /// `revision` must equal the current end; on success the end advances by
    /// exactly one and the new end is returned.
    pub fn add_revision_bundle(
        &mut self,
        revision: Revision,
        metadata: ChangeMetadata,
        changes: Vec<C>,
    ) -> Result<Revision, HistoryError> {
        let expected = self.end_revision();
        if revision != expected {
            return Err(HistoryError::OutOfOrderRevision {
                expected,
                got: revision,
            });
        }
        let next = revision
            .next()
            .ok_or(HistoryError::RevisionOverflow(revision))?;
        self.metadata.insert(revision, metadata);
        self.revisions.push(changes);
        Ok(next)
    }

    /// Metadata for the bundle committed against `revision`.
    ///
    /// `None` outside `[start, end)`.
    pub fn metadata_for(&self, revision: Revision) -> Option<&ChangeMetadata> {
        self.metadata.get(&revision)
    }

    /// All metadata, ordered by revision.
    pub fn metadata_map(&self) -> &BTreeMap<Revision, ChangeMetadata> {
        &self.metadata
    }

    /// Raw per-bundle change lists in revision order, not minimized.
    pub fn revisions_list(&self) -> &[Vec<C>] {
        &self.revisions
    }

    /// Changes of the bundle committed against `revision`.
    pub fn changes_at(&self, revision: Revision) -> Option<&[C]> {
        let index = self.start.distance(revision)?;
        self.revisions.get(index as usize).map(Vec::as_slice)
    }

    pub fn bundles(&self) -> impl Iterator<Item = ChangeBundleRef<'_, C>> {
        self.metadata
            .iter()
            .zip(self.revisions.iter())
            .map(|((revision, metadata), changes)| ChangeBundleRef {
                revision: *revision,
                metadata,
                changes,
            })
    }

    /// Net changes over the whole log.
    ///
    /// At most one change per target survives and cancelling pairs are
    /// dropped, so the order of the result carries no meaning.
    pub fn changes(&self) -> Vec<C> {
        minimize(self.revisions.iter().flatten().cloned())
    }

    /// Apply the net changes to `context`, returning how many were applied.
    pub fn replay_onto(&self, context: &mut C::Context) -> usize {
        let changes = self.changes();
        for change in &changes {
            change.apply_to(context);
        }
        changes.len()
    }

    /// Append every bundle of `other`, which must start where `self` ends.
    ///
    /// Nothing is appended if the ranges are not contiguous.
    pub fn append(&mut self, other: &RevisionLog<C>) -> Result<Revision, HistoryError> {
        if other.is_empty() {
            return Ok(self.end_revision());
        }
        let expected = self.end_revision();
        if other.start != expected {
            return Err(HistoryError::OutOfOrderRevision {
                expected,
                got: other.start,
            });
        }
        for bundle in other.bundles() {
            self.add_revision_bundle(
                bundle.revision,
                bundle.metadata.clone(),
                bundle.changes.to_vec(),
            )?;
        }
        Ok(self.end_revision())
    }

    /// The sub-history covering `[start, end)`.
    pub fn crop(&self, start: Revision, end: Revision) -> Result<RevisionLog<C>, HistoryError> {
        let out_of_range = || HistoryError::RevisionOutOfRange {
            start: self.start,
            end: self.end_revision(),
            requested_start: start,
            requested_end: end,
        };
        if start > end || start < self.start || end > self.end_revision() {
            return Err(out_of_range());
        }
        let from = self.start.distance(start).ok_or_else(out_of_range)? as usize;
        let to = self.start.distance(end).ok_or_else(out_of_range)? as usize;
        Ok(Self {
            start,
            metadata: self
                .metadata
                .range(start..end)
                .map(|(r, m)| (*r, m.clone()))
                .collect(),
            revisions: self.revisions[from..to].to_vec(),
        })
    }

    /// Check the metadata/bundle invariants, e.g. after decoding untrusted
    /// bytes.
    pub fn is_consistent(&self) -> bool {
        self.metadata.len() == self.revisions.len()
            && self.start.advance(self.revisions.len() as u64).is_some()
            && self
                .metadata
                .keys()
                .enumerate()
                .all(|(i, r)| Some(*r) == self.start.advance(i as u64))
    }
}
