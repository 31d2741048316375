//! In-process cache of loaded source tables.
//!
//! Each table is keyed by its canonical path and modification time, so a
//! file overwritten by the refresh step is re-read on next access even
//! without an explicit [`SourceCache::clear`]. Loads are counted so callers
//! (and tests) can observe that a hit did not touch the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use crate::SourceError;
use crate::communes::CommuneTable;
use crate::crime::CrimeTable;
use crate::files::missing_or_io;
use crate::population::PopulationTable;

/// Identity of a source file at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    /// Canonicalized path.
    pub path: PathBuf,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
}

impl CacheKey {
    /// Builds the key for `path` from the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingSource`] if the file does not exist.
    pub fn for_path(path: &Path) -> Result<Self, SourceError> {
        let canonical = std::fs::canonicalize(path).map_err(|e| missing_or_io(path, e))?;
        let modified = std::fs::metadata(&canonical)
            .map_err(|e| missing_or_io(path, e))?
            .modified()
            .ok();
        Ok(Self {
            path: canonical,
            modified,
        })
    }
}

/// Memoized loads of one kind of table.
#[derive(Debug)]
pub struct TableCache<T> {
    entries: Mutex<BTreeMap<CacheKey, Arc<T>>>,
    loads: AtomicUsize,
}

impl<T> Default for TableCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            loads: AtomicUsize::new(0),
        }
    }
}

impl<T> TableCache<T> {
    /// Returns the cached table for `path`, calling `load` on a miss.
    ///
    /// Older entries for the same path (different modification time) are
    /// evicted when a fresh load succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file is missing or `load` fails.
    pub fn get_or_load<F>(&self, path: &Path, load: F) -> Result<Arc<T>, SourceError>
    where
        F: FnOnce(&Path) -> Result<T, SourceError>,
    {
        let key = CacheKey::for_path(path)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(hit) = entries.get(&key) {
            log::trace!("cache hit: {}", key.path.display());
            return Ok(Arc::clone(hit));
        }

        log::debug!("cache miss: {}", key.path.display());
        let table = Arc::new(load(path)?);
        self.loads.fetch_add(1, Ordering::Relaxed);

        entries.retain(|k, _| k.path != key.path);
        entries.insert(key, Arc::clone(&table));

        Ok(table)
    }

    /// Number of times `load` actually ran.
    #[must_use]
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of cached tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached table.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Caches for the three dashboard source tables.
#[derive(Debug, Default)]
pub struct SourceCache {
    /// Crime events.
    pub crime: TableCache<CrimeTable>,
    /// Commune reference.
    pub communes: TableCache<CommuneTable>,
    /// Population.
    pub population: TableCache<PopulationTable>,
}

impl SourceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached table.
    pub fn clear(&self) {
        self.crime.clear();
        self.communes.clear();
        self.population.clear();
        log::info!("Source cache cleared");
    }

    /// Total number of file loads across all tables.
    #[must_use]
    pub fn loads(&self) -> usize {
        self.crime.loads() + self.communes.loads() + self.population.loads()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::crime::load_crime_file;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("crime_fr_cache_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    const CRIME: &str = "codgeo;annee;indicateur;nombre\n75056;2023;Vols;10\n";

    #[test]
    fn second_load_is_a_hit() {
        let path = temp_file("crime.csv", CRIME);
        let cache = SourceCache::new();

        let first = cache.crime.get_or_load(&path, load_crime_file).unwrap();
        let second = cache.crime.get_or_load(&path, load_crime_file).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.crime.loads(), 1);
        assert_eq!(cache.loads(), 1);
        assert_eq!(second.records.len(), 1);
    }

    #[test]
    fn clear_forces_reload() {
        let path = temp_file("crime.csv", CRIME);
        let cache = SourceCache::new();

        cache.crime.get_or_load(&path, load_crime_file).unwrap();
        cache.clear();
        assert!(cache.crime.is_empty());
        cache.crime.get_or_load(&path, load_crime_file).unwrap();

        assert_eq!(cache.crime.loads(), 2);
    }

    #[test]
    fn rewritten_file_is_reloaded() {
        let path = temp_file("crime.csv", CRIME);
        let cache = SourceCache::new();
        cache.crime.get_or_load(&path, load_crime_file).unwrap();

        let file = std::fs::File::options().write(true).open(&path).unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        file.set_modified(later).unwrap();
        drop(file);

        let reloaded = cache.crime.get_or_load(&path, load_crime_file).unwrap();
        assert_eq!(cache.crime.loads(), 2);
        assert_eq!(cache.crime.len(), 1);
        assert_eq!(reloaded.records.len(), 1);
    }

    #[test]
    fn missing_file_is_missing_source_and_not_counted() {
        let path = std::env::temp_dir().join(format!("{}.csv", uuid::Uuid::new_v4()));
        let cache: TableCache<CrimeTable> = TableCache::default();
        assert!(matches!(
            cache.get_or_load(&path, load_crime_file),
            Err(SourceError::MissingSource { .. })
        ));
        assert_eq!(cache.loads(), 0);
    }
}
