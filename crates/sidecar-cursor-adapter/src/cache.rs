use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Identity of a store on disk: the database file plus its write-ahead log.
/// A missing file contributes zero size and no mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSignature {
    pub size: u64,
    pub mtime: Option<SystemTime>,
    pub wal_size: u64,
    pub wal_mtime: Option<SystemTime>,
}

impl StoreSignature {
    pub fn probe(db_path: &Path, wal_path: &Path) -> Self {
        let (size, mtime) = file_stamp(db_path);
        let (wal_size, wal_mtime) = file_stamp(wal_path);
        Self {
            size,
            mtime,
            wal_size,
            wal_mtime,
        }
    }
}

fn file_stamp(path: &Path) -> (u64, Option<SystemTime>) {
    match fs::metadata(path) {
        Ok(meta) => (meta.len(), meta.modified().ok()),
        Err(_) => (0, None),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Signatures remembered per store. A store flipping back to an earlier
/// signature is served from cache.
pub const SIGNATURES_PER_STORE: usize = 4;

/// Parsed values keyed by (store path, signature); a value is used only when
/// the signature matches exactly.
#[derive(Debug, Clone)]
pub struct SessionCache<V> {
    entries: HashMap<PathBuf, Vec<(StoreSignature, V)>>,
    stats: CacheStats,
}

impl<V> Default for SessionCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<V: Clone> SessionCache<V> {
    pub fn get_or_try_insert<E, F>(
        &mut self,
        path: &Path,
        signature: StoreSignature,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.entries.get(path).and_then(|known| {
            known
                .iter()
                .find(|(cached, _)| *cached == signature)
                .map(|(_, value)| value.clone())
        }) {
            self.stats.hits += 1;
            return Ok(value);
        }
        self.stats.misses += 1;
        let value = compute()?;
        let known = self.entries.entry(path.to_path_buf()).or_default();
        if known.len() == SIGNATURES_PER_STORE {
            known.remove(0);
        }
        known.push((signature, value.clone()));
        Ok(value)
    }

    /// Drops entries for stores that no longer exist.
    pub fn retain_paths<'a, I>(&mut self, live: I)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let live: std::collections::HashSet<&PathBuf> = live.into_iter().collect();
        self.entries.retain(|path, _| live.contains(path));
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::time::Duration;
    use tempfile::tempdir;

    fn set_mtime(path: &Path, when: SystemTime) {
        OpenOptions::new()
            .write(true)
            .open(path)
            .expect("open for mtime")
            .set_modified(when)
            .expect("set mtime");
    }

    #[test]
    fn wal_mtime_change_forces_recompute_and_revert_hits() {
        let dir = tempdir().expect("tempdir");
        let db = dir.path().join("store.db");
        let wal = dir.path().join("store.db-wal");
        fs::write(&db, b"db").expect("db");
        fs::write(&wal, b"wal").expect("wal");
        let original = fs::metadata(&wal).and_then(|m| m.modified()).expect("mtime");

        let mut cache = SessionCache::<u32>::default();
        let mut computed = 0;
        let mut lookup = |cache: &mut SessionCache<u32>| {
            cache
                .get_or_try_insert(&db, StoreSignature::probe(&db, &wal), || {
                    computed += 1;
                    Ok::<_, ()>(computed)
                })
                .expect("lookup")
        };

        assert_eq!(lookup(&mut cache), 1);
        assert_eq!(lookup(&mut cache), 1);

        set_mtime(&wal, original + Duration::from_secs(30));
        assert_eq!(lookup(&mut cache), 2);

        set_mtime(&wal, original);
        assert_eq!(lookup(&mut cache), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 2 });
    }

    #[test]
    fn missing_wal_is_part_of_the_signature() {
        let dir = tempdir().expect("tempdir");
        let db = dir.path().join("store.db");
        let wal = dir.path().join("store.db-wal");
        fs::write(&db, b"db").expect("db");
        let without = StoreSignature::probe(&db, &wal);
        assert_eq!(without.wal_size, 0);
        assert!(without.wal_mtime.is_none());

        fs::write(&wal, b"").expect("wal");
        let with = StoreSignature::probe(&db, &wal);
        assert_ne!(without, with);
    }

    #[test]
    fn failed_compute_is_not_cached() {
        let mut cache = SessionCache::<u32>::default();
        let signature = StoreSignature {
            size: 1,
            mtime: None,
            wal_size: 0,
            wal_mtime: None,
        };
        let path = Path::new("/sessions/a/store.db");
        let failed: Result<u32, &str> = cache.get_or_try_insert(path, signature, || Err("locked"));
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }
}
