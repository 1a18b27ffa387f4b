//! Master-call feature cache
//!
//! Keyed store from call id to an immutable, `Arc`-shared
//! [`MasterFeatureRecord`]. Lookups hold a shared lock and bump an atomic
//! LRU clock; loads and eviction take the exclusive lock. A record still
//! referenced by a live session is never evicted, so a full cache of
//! referenced records surfaces `ResourceExhausted` instead of invalidating
//! anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use cf_core::{EngineError, EngineResult, MasterFeatureRecord, SessionConfig};
use cf_file::{read_wav_mono, save_mfc};

use crate::chain::extract_master_record;

struct CacheEntry {
    record: Arc<MasterFeatureRecord>,
    last_used: AtomicU64,
}

/// LRU cache over `.mfc` records with a WAV bake fallback
pub struct MasterCache {
    dir: PathBuf,
    capacity: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: AtomicU64,
}

impl MasterCache {
    /// Cache rooted at `dir`, holding at most `capacity` records
    pub fn new(dir: PathBuf, capacity: usize) -> Self {
        Self {
            dir,
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    /// Records currently cached
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Fetch a record, loading from disk (or baking from WAV) on miss
    ///
    /// `base` supplies the extraction configuration used when a raw
    /// recording has to be analyzed from scratch.
    pub fn get_or_load(
        &self,
        call_id: &str,
        base: &SessionConfig,
    ) -> EngineResult<Arc<MasterFeatureRecord>> {
        validate_call_id(call_id)?;

        if let Some(record) = self.lookup(call_id) {
            return Ok(record);
        }

        let mut entries = self.entries.write();
        // Another loader may have raced us here.
        if let Some(entry) = entries.get(call_id) {
            entry
                .last_used
                .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
            return Ok(Arc::clone(&entry.record));
        }

        let record = Arc::new(self.load_from_disk(call_id, base)?);
        self.evict_for_room(&mut entries)?;
        entries.insert(
            call_id.to_string(),
            CacheEntry {
                record: Arc::clone(&record),
                last_used: AtomicU64::new(self.clock.fetch_add(1, Ordering::Relaxed)),
            },
        );
        Ok(record)
    }

    /// Shared-lock fast path
    fn lookup(&self, call_id: &str) -> Option<Arc<MasterFeatureRecord>> {
        let entries = self.entries.read();
        let entry = entries.get(call_id)?;
        entry
            .last_used
            .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(Arc::clone(&entry.record))
    }

    fn load_from_disk(
        &self,
        call_id: &str,
        base: &SessionConfig,
    ) -> EngineResult<MasterFeatureRecord> {
        let mfc_path = self.dir.join(format!("{call_id}.mfc"));
        match cf_file::load_mfc(&mfc_path, call_id) {
            Ok(record) => Ok(record),
            Err(EngineError::NotFound(_)) => self.bake_from_wav(call_id, base, &mfc_path),
            Err(other) => Err(other),
        }
    }

    /// Disk miss: analyze the raw recording and persist a fresh container
    fn bake_from_wav(
        &self,
        call_id: &str,
        base: &SessionConfig,
        mfc_path: &Path,
    ) -> EngineResult<MasterFeatureRecord> {
        let wav_path = self.dir.join(format!("{call_id}.wav"));
        let audio = read_wav_mono(&wav_path).map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(call_id.to_string()),
            other => other,
        })?;

        log::info!(
            "baking master '{}' from {} ({:.2}s @ {} Hz)",
            call_id,
            wav_path.display(),
            audio.duration(),
            audio.sample_rate
        );
        let record = extract_master_record(call_id, &audio.samples, audio.sample_rate, base)?;

        if let Err(e) = save_mfc(mfc_path, &record) {
            // The in-memory record is still usable; the next load re-bakes.
            log::warn!("could not persist baked master '{}': {e}", call_id);
        }
        Ok(record)
    }

    /// Make room for one insertion, evicting unreferenced LRU records
    fn evict_for_room(&self, entries: &mut HashMap<String, CacheEntry>) -> EngineResult<()> {
        while entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.record) == 1)
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    log::debug!("evicting master '{key}' from cache");
                    entries.remove(&key);
                }
                None => {
                    return Err(EngineError::ResourceExhausted {
                        reason: format!(
                            "master cache cap {} reached and every record is referenced",
                            self.capacity
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Call ids become file stems; keep them from escaping the master directory
fn validate_call_id(call_id: &str) -> EngineResult<()> {
    if call_id.is_empty() {
        return Err(EngineError::invalid_params("call id must not be empty"));
    }
    if call_id.contains(['/', '\\']) || call_id.contains("..") {
        return Err(EngineError::invalid_params(format!(
            "call id '{call_id}' must not contain path components"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_core::{ExtractorParams, FeatureFrame};

    fn record(call_id: &str) -> MasterFeatureRecord {
        let params = ExtractorParams {
            sample_rate: 44_100,
            frame_size: 512,
            hop_size: 256,
            mfcc_coeffs: 13,
            n_filters: 26,
        };
        let frames: Vec<FeatureFrame> = (0..12)
            .map(|i| FeatureFrame {
                coeffs: vec![i as f32; 13],
                energy: -1.0,
                timestamp: i as f64 * 256.0 / 44_100.0,
            })
            .collect();
        MasterFeatureRecord::from_frames(call_id, params, frames, None)
    }

    fn seeded_cache(capacity: usize, ids: &[&str]) -> (tempfile::TempDir, MasterCache) {
        let dir = tempfile::tempdir().unwrap();
        for id in ids {
            save_mfc(&dir.path().join(format!("{id}.mfc")), &record(id)).unwrap();
        }
        let cache = MasterCache::new(dir.path().to_path_buf(), capacity);
        (dir, cache)
    }

    #[test]
    fn loads_and_caches() {
        let (_dir, cache) = seeded_cache(4, &["elk"]);
        let base = SessionConfig::default();

        let first = cache.get_or_load("elk", &base).unwrap();
        let second = cache.get_or_load("elk", &base).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "second hit must share the record");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (_dir, cache) = seeded_cache(4, &[]);
        assert!(cache.is_empty());
        assert!(matches!(
            cache.get_or_load("ghost", &SessionConfig::default()),
            Err(EngineError::NotFound(_))
        ));
        assert!(cache.is_empty(), "a failed load must not populate the cache");
    }

    #[test]
    fn rejects_path_escaping_ids() {
        let (_dir, cache) = seeded_cache(4, &[]);
        let base = SessionConfig::default();
        assert!(cache.get_or_load("../etc/passwd", &base).is_err());
        assert!(cache.get_or_load("a/b", &base).is_err());
        assert!(cache.get_or_load("", &base).is_err());
    }

    #[test]
    fn evicts_unreferenced_lru() {
        let (_dir, cache) = seeded_cache(2, &["a", "b", "c"]);
        let base = SessionConfig::default();

        // Load a and b, then drop both references.
        cache.get_or_load("a", &base).unwrap();
        cache.get_or_load("b", &base).unwrap();
        assert_eq!(cache.len(), 2);

        // c forces eviction of the least recently used (a).
        cache.get_or_load("c", &base).unwrap();
        assert_eq!(cache.len(), 2);

        // a loads again from disk fine.
        cache.get_or_load("a", &base).unwrap();
    }

    #[test]
    fn referenced_records_are_never_evicted() {
        let (_dir, cache) = seeded_cache(1, &["a", "b"]);
        let base = SessionConfig::default();

        let held = cache.get_or_load("a", &base).unwrap();
        let err = cache.get_or_load("b", &base).unwrap_err();
        assert!(matches!(err, EngineError::ResourceExhausted { .. }));

        drop(held);
        assert!(cache.get_or_load("b", &base).is_ok());
    }

    #[test]
    fn bakes_from_wav_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..44_100)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin())
            .collect();
        cf_file::write_wav_mono(&dir.path().join("bugle.wav"), &samples, 44_100).unwrap();

        let cache = MasterCache::new(dir.path().to_path_buf(), 4);
        let record = cache
            .get_or_load("bugle", &SessionConfig::default())
            .unwrap();
        assert!(!record.frames.is_empty());
        assert!(record.enhanced.is_some());

        // The bake left a container behind for the next process.
        assert!(dir.path().join("bugle.mfc").exists());
    }
}
