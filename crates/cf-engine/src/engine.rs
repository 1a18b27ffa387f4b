//! Engine façade
//!
//! An [`Engine`] is an owned value, not a process singleton; tests and
//! embedders may hold several. It owns the session map, the master cache,
//! the transport buffer pool, and the worker pool. Producers run on the
//! caller's thread and never block; workers drain per-session rings in the
//! background.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use cf_analyze::PitchReading;
use cf_core::{
    EngineConfig, EngineError, EngineResult, FeatureFrame, SessionConfig, SimilarityReport,
    validate_samples,
};
use cf_dsp::viz::{LevelSnapshot, WaveformBucket};
use cf_rt::BufferPool;

use crate::cache::MasterCache;
use crate::session::{SessionId, SessionShared, SessionState, SessionStats};
use crate::workers::WorkerPool;

/// Worker pool cap when sizing from hardware threads
const MAX_AUTO_WORKERS: usize = 8;

/// Session-based analysis engine
pub struct Engine {
    config: EngineConfig,
    pool: Arc<BufferPool>,
    cache: MasterCache,
    workers: WorkerPool,
    sessions: RwLock<HashMap<SessionId, Arc<SessionShared>>>,
    next_id: AtomicU64,
}

impl Engine {
    /// Engine with default configuration; infallible
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
            .unwrap_or_else(|e| unreachable!("default engine config rejected: {e}"))
    }

    /// Engine with explicit configuration
    pub fn with_config(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let threads = config
            .worker_threads
            .unwrap_or_else(|| num_cpus::get().min(MAX_AUTO_WORKERS));
        let pool = Arc::new(BufferPool::new(
            config.pool_chunk_samples,
            config.pool_initial_buffers,
            config.pool_max_buffers,
        ));
        let cache = MasterCache::new(config.master_dir.clone(), config.cache_capacity);
        log::info!(
            "engine up: {} workers, cache cap {}, master dir {}",
            threads,
            config.cache_capacity,
            config.master_dir.display()
        );
        Ok(Self {
            pool,
            cache,
            workers: WorkerPool::new(threads),
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    /// Create a session with the standard knobs
    pub fn create_session(
        &self,
        sample_rate: u32,
        frame_size: usize,
        hop_size: usize,
        mfcc_coeffs: usize,
    ) -> EngineResult<SessionId> {
        self.create_session_with(SessionConfig {
            sample_rate,
            frame_size,
            hop_size,
            mfcc_coeffs,
            ..SessionConfig::default()
        })
    }

    /// Create a session with a full configuration
    pub fn create_session_with(&self, config: SessionConfig) -> EngineResult<SessionId> {
        config.validate()?;

        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_sessions {
            return Err(EngineError::ResourceExhausted {
                reason: format!("session cap of {} reached", self.config.max_sessions),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = SessionShared::new(id, config, Arc::clone(&self.pool))?;
        sessions.insert(id, session);
        log::debug!("session {id} created");
        Ok(id)
    }

    fn get(&self, id: SessionId) -> EngineResult<Arc<SessionShared>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(id))
    }

    /// Attach a master call, loading (or baking) it on cache miss
    pub fn load_master_call(&self, id: SessionId, call_id: &str) -> EngineResult<()> {
        let session = self.get(id)?;
        if session.state() == SessionState::Finalized {
            return Err(EngineError::WrongState {
                operation: "load_master_call",
                state: SessionState::Finalized.name(),
            });
        }

        let record = self.cache.get_or_load(call_id, &session.config)?;

        let mut inner = session.inner.write();
        if !record.params_match(&inner.chain.params()) {
            return Err(EngineError::VersionMismatch {
                reason: format!(
                    "master '{}' extracted with {:?}, session expects {:?}",
                    call_id,
                    record.params,
                    inner.chain.params()
                ),
            });
        }
        inner.master = Some(record);
        drop(inner);
        session.mark_active();
        log::debug!("session {id} attached master '{call_id}'");
        Ok(())
    }

    /// Submit a chunk of mono samples; never blocks
    ///
    /// A full ring rejects the whole chunk with `Overflow` and no side
    /// effects; retry after the consumer catches up. A single chunk larger
    /// than the ring itself can never be accepted and must be split first.
    pub fn process_chunk(&self, id: SessionId, samples: &[f32]) -> EngineResult<()> {
        let session = self.get(id)?;
        match session.state() {
            SessionState::Finalized => {
                return Err(EngineError::WrongState {
                    operation: "process_chunk",
                    state: SessionState::Finalized.name(),
                });
            }
            SessionState::Destroyed => return Err(EngineError::Canceled(id)),
            SessionState::Created | SessionState::Active => {}
        }

        validate_samples(samples)?;
        if samples.is_empty() {
            session.mark_active();
            return Ok(());
        }

        if !session.ring.push(samples) {
            session.overflows.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::Overflow(id));
        }
        session.mark_active();

        // Pin to a worker unless one already owns this session. Hosts that
        // pump the pipeline themselves skip the pool entirely.
        if session.config.auto_drain && !session.in_worker.swap(true, Ordering::AcqRel) {
            self.workers.submit(session);
        }
        Ok(())
    }

    /// Caller-pumped drain for sessions created with `auto_drain = false`
    ///
    /// Processes up to `max_drain_per_call` queued chunks and returns how
    /// many were consumed.
    pub fn drain_session(&self, id: SessionId) -> EngineResult<usize> {
        let session = self.get(id)?;
        Ok(session.drain_once())
    }

    /// Current best-effort similarity snapshot
    ///
    /// Always well-formed: before a master is attached, or before enough
    /// user data has arrived, the report carries `readiness = false` and a
    /// zero overall score rather than an error.
    pub fn get_similarity(&self, id: SessionId) -> EngineResult<SimilarityReport> {
        let session = self.get(id)?;
        let inner = session.inner.read();
        if let Some(report) = &inner.final_report {
            return Ok(report.clone());
        }
        match session.compute_report(&inner) {
            Ok(report) => Ok(report),
            Err(EngineError::InsufficientData { .. }) => Ok(SimilarityReport::not_ready()),
            Err(other) => Err(other),
        }
    }

    /// Freeze the session and return its final report; idempotent
    pub fn finalize(&self, id: SessionId) -> EngineResult<SimilarityReport> {
        let session = self.get(id)?;
        let mut inner = session.inner.write();
        if let Some(report) = &inner.final_report {
            return Ok(report.clone());
        }

        session.set_state(SessionState::Finalized);
        session.drain_all(&mut inner);

        let cap = Duration::from_millis(self.config.finalize_cap_ms);
        let started = Instant::now();
        let report = match session.compute_report(&inner) {
            Ok(mut report) => {
                if started.elapsed() > cap {
                    log::warn!(
                        "session {id}: deferred finalize work exceeded {:?}, degrading report",
                        cap
                    );
                    report.readiness = false;
                    report.overall = 0.0;
                }
                report
            }
            // No master attached: finalize still returns a report.
            Err(EngineError::InsufficientData { .. }) => SimilarityReport::not_ready(),
            Err(other) => return Err(other),
        };

        inner.final_report = Some(report.clone());
        log::debug!(
            "session {id} finalized: overall {:.3}, ready {}",
            report.overall,
            report.readiness
        );
        Ok(report)
    }

    /// Tear a session down; safe in any state
    pub fn destroy_session(&self, id: SessionId) -> EngineResult<()> {
        let session = self
            .sessions
            .write()
            .remove(&id)
            .ok_or(EngineError::SessionNotFound(id))?;

        session.stop.stop();
        session.set_state(SessionState::Destroyed);
        // Wait for an in-flight drain to reach its safe point.
        drop(session.inner.write());
        log::debug!("session {id} destroyed");
        Ok(())
    }

    /// Lifecycle state of a session
    pub fn session_state(&self, id: SessionId) -> EngineResult<SessionState> {
        Ok(self.get(id)?.state())
    }

    /// Live session count
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Feature frames extracted so far
    pub fn feature_count(&self, id: SessionId) -> EngineResult<usize> {
        let session = self.get(id)?;
        let inner = session.inner.read();
        Ok(inner.chain.feature_count())
    }

    /// Copy of the session's feature frames
    pub fn features(&self, id: SessionId) -> EngineResult<Vec<FeatureFrame>> {
        let session = self.get(id)?;
        let inner = session.inner.read();
        Ok(inner.chain.features().frames().to_vec())
    }

    /// Per-frame pitch readings, empty when the tracker is disabled
    pub fn pitch_track(&self, id: SessionId) -> EngineResult<Vec<PitchReading>> {
        let session = self.get(id)?;
        let inner = session.inner.read();
        Ok(inner.chain.pitch_readings().to_vec())
    }

    /// Streaming statistics snapshot
    pub fn session_stats(&self, id: SessionId) -> EngineResult<SessionStats> {
        let session = self.get(id)?;
        let chain_stats = session.inner.read().chain.stats();
        Ok(session.stats(chain_stats))
    }

    /// Current level meter readout
    pub fn level_snapshot(&self, id: SessionId) -> EngineResult<LevelSnapshot> {
        let session = self.get(id)?;
        let inner = session.inner.read();
        Ok(inner.chain.level())
    }

    /// Completed waveform overview buckets
    pub fn waveform_summary(&self, id: SessionId) -> EngineResult<Vec<WaveformBucket>> {
        let session = self.get(id)?;
        let inner = session.inner.read();
        Ok(inner.chain.waveform().to_vec())
    }

    /// Records currently held by the master cache
    pub fn cached_masters(&self) -> usize {
        self.cache.len()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for (_, session) in self.sessions.write().drain() {
            session.stop.stop();
            session.set_state(SessionState::Destroyed);
        }
        self.workers.shutdown();
    }
}
