//! Cached NetCDF file handles with per-file mutexes.
//!
//! The reader opens each file at most once per catalog epoch and
//! shares the handle between the driver thread and the catalog
//! workers. NetCDF handles are not thread-safe within a single file,
//! so every call against a handle must hold the per-file mutex this
//! cache hands out alongside it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cf_common::{CfError, CfResult};

/// Shared open handle plus the mutex serializing access to it.
pub type Handle = (Arc<netcdf::File>, Arc<Mutex<()>>);

#[derive(Default)]
struct HandleEntry {
    lock: Arc<Mutex<()>>,
    handle: Option<Arc<netcdf::File>>,
}

/// Path-keyed cache of open NetCDF handles.
///
/// Owned by the reader instance and passed to worker tasks by
/// reference; cleared whenever the reader is modified.
#[derive(Default)]
pub struct HandleCache {
    entries: Mutex<HashMap<String, HandleEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HandleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, HandleEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed one closed entry per file, dropping whatever was cached.
    pub fn initialize(&self, files: &[String]) {
        let mut entries = self.lock_entries();
        entries.clear();
        for file in files {
            entries.insert(file.clone(), HandleEntry::default());
        }
    }

    /// Get the handle for `file` under `root`, opening it on a cold
    /// entry. The returned mutex must be held for the duration of
    /// every NetCDF call made against the handle.
    pub fn get(&self, root: &Path, file: &str) -> CfResult<Handle> {
        let mut entries = self.lock_entries();
        let entry = entries.entry(file.to_string()).or_default();

        if let Some(handle) = &entry.handle {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((Arc::clone(handle), Arc::clone(&entry.lock)));
        }

        let path = root.join(file);
        let opened = netcdf::open(&path).map_err(|e| {
            CfError::NetCdf(format!("failed to open {}: {}", path.display(), e))
        })?;
        let handle = Arc::new(opened);
        entry.handle = Some(Arc::clone(&handle));
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok((handle, Arc::clone(&entry.lock)))
    }

    /// Drop the handle for one file, keeping its entry. Used by
    /// workers after one-off reads and on read failure.
    pub fn close(&self, file: &str) {
        if let Some(entry) = self.lock_entries().get_mut(file) {
            entry.handle = None;
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    /// Number of currently open handles.
    pub fn open_count(&self) -> usize {
        self.lock_entries()
            .values()
            .filter(|e| e.handle.is_some())
            .count()
    }

    /// (hits, misses) over the cache lifetime.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_an_error() {
        let cache = HandleCache::new();
        let err = cache.get(Path::new("/nonexistent"), "nope.nc");
        assert!(err.is_err());
        assert_eq!(cache.open_count(), 0);
    }

    #[test]
    fn test_initialize_seeds_closed_entries() {
        let cache = HandleCache::new();
        cache.initialize(&["a.nc".to_string(), "b.nc".to_string()]);
        assert_eq!(cache.open_count(), 0);
        cache.close("a.nc");
        assert_eq!(cache.open_count(), 0);
        cache.clear();
        assert_eq!(cache.open_count(), 0);
    }
}
