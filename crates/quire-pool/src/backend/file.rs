//! File-per-document backend.
//!
//! Each history lives at `<root>/<document id>.history`. Writes go to a
//! sibling temp file that is renamed over the original, so a crash mid-write
//! leaves the previous history intact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use quire_history::{Change, DocumentId, HISTORY_EXTENSION, RevisionLog};
use tempfile::NamedTempFile;
use tracing::debug;

use super::HistoryBackend;
use crate::codec;
use crate::error::{LoadError, StoreError};

/// Stores histories as `.history` files under a root directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Use `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the history file for `id`.
    pub fn path_for(&self, id: &DocumentId) -> PathBuf {
        self.root
            .join(format!("{}.{}", id.as_str(), HISTORY_EXTENSION))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<DocumentId>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect(&path, out)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(HISTORY_EXTENSION) {
                continue;
            }
            let Ok(relative) = path.with_extension("").strip_prefix(&self.root).map(Path::to_path_buf)
            else {
                continue;
            };
            let name = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/");
            if let Ok(id) = DocumentId::new(name) {
                out.push(id);
            }
        }
        Ok(())
    }
}

impl<C: Change> HistoryBackend<C> for FileBackend {
    fn load(&self, id: &DocumentId) -> Result<RevisionLog<C>, LoadError> {
        let path = self.path_for(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::NotFound(id.clone()));
            }
            Err(source) => return Err(LoadError::Io { path, source }),
        };
        let log = codec::decode(&bytes).map_err(|e| LoadError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })?;
        debug!(document = %id, bytes = bytes.len(), "Read history file");
        Ok(log)
    }

    fn store(&self, id: &DocumentId, log: &RevisionLog<C>) -> Result<(), StoreError> {
        let path = self.path_for(id);
        let bytes = codec::encode(log).map_err(|e| StoreError::Encode(e.to_string()))?;
        let staged = stage(&path, &bytes)?;
        staged.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        debug!(document = %id, bytes = bytes.len(), "Wrote history file");
        Ok(())
    }

    fn exists(&self, id: &DocumentId) -> bool {
        self.path_for(id).is_file()
    }

    fn create(&self, id: &DocumentId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        let bytes = codec::encode(&RevisionLog::<C>::new())
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        let staged = stage(&path, &bytes)?;
        // no-clobber persist makes the existence check atomic
        match staged.persist_noclobber(&path) {
            Ok(_) => {
                debug!(document = %id, "Created history file");
                Ok(())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(id.clone()))
            }
            Err(e) => Err(StoreError::Io {
                path,
                source: e.error,
            }),
        }
    }

    fn list(&self) -> Result<Vec<DocumentId>, LoadError> {
        let mut out = Vec::new();
        match self.collect(&self.root, &mut out) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(source) => {
                return Err(LoadError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Write `bytes` to a synced temp file next to `path`, ready to be
/// renamed into place.
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, StoreError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let io_err = |source: io::Error| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut staged = NamedTempFile::new_in(dir).map_err(io_err)?;
    staged.write_all(bytes).map_err(io_err)?;
    staged.as_file().sync_all().map_err(io_err)?;
    Ok(staged)
}
