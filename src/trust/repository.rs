//! Trust anchor persistence.

use super::anchor::TrustAnchor;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Storage backend for trust anchors.
///
/// Implementations keep at most one row per Subject Key Identifier.
pub trait TrustRepository: Send + Sync {
    /// Every stored anchor.
    fn all(&self) -> Result<Vec<TrustAnchor>>;

    /// Insert anchors whose SKI is not stored yet; returns how many were added.
    fn insert(&self, anchors: &[TrustAnchor]) -> Result<usize>;

    /// Remove anchors matching `predicate`; returns how many were removed.
    fn remove_where(&self, predicate: &dyn Fn(&TrustAnchor) -> bool) -> Result<usize>;

    /// Anchor with the given (normalized) SKI.
    fn find(&self, subject_key_id: &str) -> Result<Option<TrustAnchor>> {
        Ok(self.all()?.into_iter().find(|a| a.subject_key_id == subject_key_id))
    }

    /// Oldest `created_at` among stored rows.
    fn earliest_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.all()?.iter().map(|a| a.created_at).min())
    }
}

fn lock_poisoned() -> Error {
    Error::TrustStore("repository lock poisoned".to_string())
}

/// Merge `anchors` into `rows`, skipping SKIs already present.
fn merge(rows: &mut Vec<TrustAnchor>, anchors: &[TrustAnchor]) -> usize {
    let mut known: HashSet<String> = rows.iter().map(|a| a.subject_key_id.clone()).collect();
    let before = rows.len();
    for anchor in anchors {
        if known.insert(anchor.subject_key_id.clone()) {
            rows.push(anchor.clone());
        }
    }
    rows.len() - before
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct MemoryTrustRepository {
    rows: RwLock<Vec<TrustAnchor>>,
}

impl MemoryTrustRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustRepository for MemoryTrustRepository {
    fn all(&self) -> Result<Vec<TrustAnchor>> {
        Ok(self.rows.read().map_err(|_| lock_poisoned())?.clone())
    }

    fn insert(&self, anchors: &[TrustAnchor]) -> Result<usize> {
        let mut rows = self.rows.write().map_err(|_| lock_poisoned())?;
        Ok(merge(&mut rows, anchors))
    }

    fn remove_where(&self, predicate: &dyn Fn(&TrustAnchor) -> bool) -> Result<usize> {
        let mut rows = self.rows.write().map_err(|_| lock_poisoned())?;
        let before = rows.len();
        rows.retain(|a| !predicate(a));
        Ok(before - rows.len())
    }
}

/// JSON-file repository. Every mutation rewrites the file through a
/// temporary file and a rename.
#[derive(Debug)]
pub struct JsonFileTrustRepository {
    path: PathBuf,
    rows: RwLock<Vec<TrustAnchor>>,
}

impl JsonFileTrustRepository {
    /// Open `path`, starting empty if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rows = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Opened trust repository {} with {} anchor(s)", path.display(), rows.len());
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, rows: &[TrustAnchor]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, rows)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

impl TrustRepository for JsonFileTrustRepository {
    fn all(&self) -> Result<Vec<TrustAnchor>> {
        Ok(self.rows.read().map_err(|_| lock_poisoned())?.clone())
    }

    fn insert(&self, anchors: &[TrustAnchor]) -> Result<usize> {
        let mut rows = self.rows.write().map_err(|_| lock_poisoned())?;
        let mut updated = rows.clone();
        let added = merge(&mut updated, anchors);
        if added > 0 {
            self.persist(&updated)?;
            *rows = updated;
        }
        Ok(added)
    }

    fn remove_where(&self, predicate: &dyn Fn(&TrustAnchor) -> bool) -> Result<usize> {
        let mut rows = self.rows.write().map_err(|_| lock_poisoned())?;
        let updated: Vec<TrustAnchor> = rows.iter().filter(|a| !predicate(a)).cloned().collect();
        let removed = rows.len() - updated.len();
        if removed > 0 {
            self.persist(&updated)?;
            *rows = updated;
        }
        Ok(removed)
    }
}
