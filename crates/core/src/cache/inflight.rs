use crate::cache::progress::EntryProgress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_TARGET: &str = "tts_cache::inflight";

/// At most one synthesis per entry path at a time.
#[derive(Debug, Default)]
pub struct InflightRegistry {
    entries: Mutex<HashMap<PathBuf, Arc<EntryProgress>>>,
}

#[derive(Debug)]
pub enum Lookup {
    /// Another request is already synthesizing this entry.
    Joined(Arc<EntryProgress>),
    /// The entry is on disk and nobody is writing it.
    Cached,
    /// The caller owns the synthesis for this entry until the slot drops.
    Claimed(InflightSlot),
}

impl InflightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Joins an in-flight entry, reports a cached one, or claims the path.
    ///
    /// The existence check runs under the registry lock so that a slot released between the check
    /// and the claim cannot leave two writers on one path.
    pub fn lookup<E>(
        self: &Arc<Self>,
        path: &Path,
        exists: impl FnOnce(&Path) -> Result<bool, E>,
    ) -> Result<Lookup, E> {
        let mut entries = self.entries.lock();
        if let Some(progress) = entries.get(path) {
            tracing::debug!(target: LOG_TARGET, path = %path.display(), "joining in-flight synthesis");
            return Ok(Lookup::Joined(Arc::clone(progress)));
        }
        if exists(path)? {
            return Ok(Lookup::Cached);
        }
        let progress = Arc::new(EntryProgress::new(path));
        entries.insert(path.to_path_buf(), Arc::clone(&progress));
        Ok(Lookup::Claimed(InflightSlot {
            registry: Arc::clone(self),
            progress,
        }))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, progress: &Arc<EntryProgress>) {
        let mut entries = self.entries.lock();
        if entries
            .get(progress.path())
            .is_some_and(|current| Arc::ptr_eq(current, progress))
        {
            entries.remove(progress.path());
        }
    }
}

/// Ownership of one in-flight entry. Dropping it unregisters the entry. An entry dropped before
/// reaching a terminal state (a cancelled fetch, a sink task torn down with its runtime) is marked
/// failed and its file is deleted before the path is released, so a later lookup cannot report the
/// leftover as cached.
#[derive(Debug)]
pub struct InflightSlot {
    registry: Arc<InflightRegistry>,
    progress: Arc<EntryProgress>,
}

impl InflightSlot {
    pub fn progress(&self) -> &Arc<EntryProgress> {
        &self.progress
    }
}

impl Drop for InflightSlot {
    fn drop(&mut self) {
        if self.progress.mark_failed("synthesis abandoned") {
            let path = self.progress.path();
            tracing::warn!(target: LOG_TARGET, path = %path.display(), "in-flight entry dropped before completion");
            // Drop cannot await; this is a single unlink
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(target: LOG_TARGET, path = %path.display(), error = %e, "failed to remove abandoned cache entry");
                }
            }
        }
        self.registry.release(&self.progress);
    }
}
