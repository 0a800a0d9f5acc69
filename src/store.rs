//! Fragment persistence behind a narrow capability trait.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::models::StoredFragment;

/// Durable home of the fragment collection and its embeddings.
///
/// `flush` is the explicit drain point: after it returns, every earlier
/// `add` or `clear` is visible to a fresh store opened on the same backing
/// location.
pub trait FragmentStore: Send + Sync {
    fn add(&self, fragments: Vec<StoredFragment>) -> Result<()>;
    fn all(&self) -> Result<Vec<StoredFragment>>;
    fn count(&self) -> Result<usize>;

    /// Distinct `source` values present in the store.
    fn sources(&self) -> Result<HashSet<String>> {
        Ok(self
            .all()?
            .into_iter()
            .map(|s| s.fragment.metadata.source)
            .collect())
    }

    fn clear(&self) -> Result<()>;
    fn flush(&self) -> Result<()>;
}

/// Non-persistent store for tests and throwaway runs.
#[derive(Default)]
pub struct InMemoryFragmentStore {
    entries: RwLock<Vec<StoredFragment>>,
}

impl InMemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FragmentStore for InMemoryFragmentStore {
    fn add(&self, fragments: Vec<StoredFragment>) -> Result<()> {
        self.entries.write().extend(fragments);
        Ok(())
    }

    fn all(&self) -> Result<Vec<StoredFragment>> {
        Ok(self.entries.read().clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    fn sources(&self) -> Result<HashSet<String>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|s| s.fragment.metadata.source.clone())
            .collect())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Store persisted as a single JSON file.
///
/// Every mutation rewrites the file through a temp file + rename, so a
/// crash leaves either the old or the new collection on disk. The
/// in-memory collection only changes once the write has succeeded.
pub struct JsonFragmentStore {
    entries: RwLock<Vec<StoredFragment>>,
    persist_path: PathBuf,
}

impl JsonFragmentStore {
    pub fn open_or_create(persist_path: &Path) -> Result<Self> {
        if let Some(parent) = persist_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let entries: Vec<StoredFragment> = if persist_path.exists() {
            let data = std::fs::read_to_string(persist_path)
                .context("Failed to read fragment store")?;
            serde_json::from_str(&data).context("Fragment store file is corrupt")?
        } else {
            Vec::new()
        };

        info!(
            "Opened fragment store at {} ({} fragments)",
            persist_path.display(),
            entries.len()
        );

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path: persist_path.to_path_buf(),
        })
    }

    fn persist(&self, entries: &[StoredFragment]) -> Result<()> {
        let data = serde_json::to_string(entries).context("Failed to serialize fragments")?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data).context("Failed to write fragment store")?;
        std::fs::rename(&tmp_path, &self.persist_path)
            .context("Failed to replace fragment store")?;
        debug!("Persisted {} fragments", entries.len());
        Ok(())
    }
}

impl FragmentStore for JsonFragmentStore {
    fn add(&self, fragments: Vec<StoredFragment>) -> Result<()> {
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + fragments.len());
        next.extend(entries.iter().cloned());
        next.extend(fragments);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn all(&self) -> Result<Vec<StoredFragment>> {
        Ok(self.entries.read().clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    fn sources(&self) -> Result<HashSet<String>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|s| s.fragment.metadata.source.clone())
            .collect())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        self.persist(&[])?;
        entries.clear();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let entries = self.entries.read();
        self.persist(&entries)
    }
}
