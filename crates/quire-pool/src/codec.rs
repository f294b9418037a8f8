//! On-disk encoding of revision logs.
//!
//! ```text
//! ┌──────────┬────────────┬──────────────────────────────┐
//! │ "QRH1"   │ format u16 │ postcard(RevisionLog<C>)     │
//! │ 4 bytes  │ LE         │ rest of file                 │
//! └──────────┴────────────┴──────────────────────────────┘
//! ```

use quire_history::{Change, RevisionLog};
use thiserror::Error;

use crate::constants::{HISTORY_FORMAT, HISTORY_MAGIC};

const HEADER_LEN: usize = HISTORY_MAGIC.len() + 2;

/// Why a byte buffer is not a valid history.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated header ({0} bytes)")]
    Truncated(usize),

    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported format {0}")]
    UnsupportedFormat(u16),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("revisions are not contiguous or run past the maximum")]
    Inconsistent,
}

pub fn encode<C: Change>(log: &RevisionLog<C>) -> Result<Vec<u8>, postcard::Error> {
    let mut out = Vec::with_capacity(HEADER_LEN + 64);
    out.extend_from_slice(HISTORY_MAGIC);
    out.extend_from_slice(&HISTORY_FORMAT.to_le_bytes());
    postcard::to_extend(log, out)
}

pub fn decode<C: Change>(bytes: &[u8]) -> Result<RevisionLog<C>, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    let (magic, rest) = bytes.split_at(HISTORY_MAGIC.len());
    if magic != HISTORY_MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(DecodeError::BadMagic(found));
    }
    let format = u16::from_le_bytes([rest[0], rest[1]]);
    if format != HISTORY_FORMAT {
        return Err(DecodeError::UnsupportedFormat(format));
    }
    let (log, remainder): (RevisionLog<C>, _) = postcard::take_from_bytes(&rest[2..])?;
    if !remainder.is_empty() {
        return Err(DecodeError::TrailingBytes(remainder.len()));
    }
    if !log.is_consistent() {
        return Err(DecodeError::Inconsistent);
    }
    Ok(log)
}

/// A well-framed history whose revisions run past `u64::MAX`.
#[cfg(test)]
pub(crate) fn overflowing_history() -> Vec<u8> {
    use quire_history::{ChangeMetadata, Edit};
    use std::collections::BTreeMap;

    // same field order as RevisionLog, without its invariants
    #[derive(serde::Serialize)]
    struct RawLog {
        start: u64,
        metadata: BTreeMap<u64, ChangeMetadata>,
        revisions: Vec<Vec<Edit>>,
    }

    let raw = RawLog {
        start: u64::MAX,
        metadata: BTreeMap::from([(u64::MAX, ChangeMetadata::at("user:eve", 1))]),
        revisions: vec![vec![Edit::AddAxiom("A".into())]],
    };
    let mut out = HISTORY_MAGIC.to_vec();
    out.extend_from_slice(&HISTORY_FORMAT.to_le_bytes());
    postcard::to_extend(&raw, out).unwrap()
}
