//! Session state and shared handle
//!
//! A session is the unit of isolation: it owns its ring buffer, analysis
//! chain, and scorer, and is reached through an `Arc` held by the engine
//! map and (transiently) by the worker pool. Queries take the inner lock
//! shared; the pipeline worker and finalizer take it exclusive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use cf_core::{
    EngineError, EngineResult, MasterFeatureRecord, SessionConfig, SimilarityReport,
};
use cf_rt::{BufferPool, ChunkRing, StopToken};
use cf_sim::{FusionConfig, Scorer, UserEvidence};

use crate::chain::{AnalysisChain, ChainStats};

/// Opaque session identifier; monotonically increasing, never reused
pub type SessionId = u64;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Exists, nothing processed yet
    Created = 0,
    /// Accepting chunks
    Active = 1,
    /// Read-only; report frozen
    Finalized = 2,
    /// Torn down; only observable transiently
    Destroyed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::Finalized,
            _ => Self::Destroyed,
        }
    }

    /// Lower-case name for error messages
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Finalized => "finalized",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Caller-facing streaming statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionStats {
    /// Samples accepted, including gated silence
    pub total_samples: u64,
    /// Windows seen by the VAD gate
    pub total_frames: u64,
    /// Feature frames extracted
    pub feature_frames: u64,
    /// Seconds of audio accepted
    pub duration_seconds: f64,
    /// `process_chunk` calls rejected with `Overflow`
    pub overflow_count: u64,
}

/// Mutable session state behind the inner lock
pub(crate) struct SessionInner {
    pub chain: AnalysisChain,
    pub master: Option<Arc<MasterFeatureRecord>>,
    pub final_report: Option<SimilarityReport>,
}

/// Scorer plus its snapshot cache, one lock for both
struct ScorerSlot {
    scorer: Scorer,
    cached: Option<CachedScore>,
}

struct CachedScore {
    feature_count: usize,
    master_fingerprint: u64,
    report: SimilarityReport,
}

/// Shared session handle
pub(crate) struct SessionShared {
    pub id: SessionId,
    pub config: SessionConfig,
    state: AtomicU8,
    pub ring: ChunkRing,
    pub stop: StopToken,
    /// Pins the session to at most one pipeline worker
    pub in_worker: AtomicBool,
    pub overflows: AtomicU64,
    pool: Arc<BufferPool>,
    pub inner: RwLock<SessionInner>,
    scorer: Mutex<ScorerSlot>,
}

impl SessionShared {
    /// Build a session, drawing ring slots from `pool`
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        pool: Arc<BufferPool>,
    ) -> EngineResult<Arc<Self>> {
        let chain = AnalysisChain::new(config.clone())?;
        let ring = ChunkRing::new(config.ring_chunks, pool.buf_len(), &pool)?;
        Ok(Arc::new(Self {
            id,
            state: AtomicU8::new(SessionState::Created as u8),
            ring,
            stop: StopToken::new(),
            in_worker: AtomicBool::new(false),
            overflows: AtomicU64::new(0),
            pool,
            inner: RwLock::new(SessionInner {
                chain,
                master: None,
                final_report: None,
            }),
            scorer: Mutex::new(ScorerSlot {
                scorer: Scorer::new(FusionConfig::default()),
                cached: None,
            }),
            config,
        }))
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition unconditionally; callers serialize via the inner lock
    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Created → Active, once; later states win
    pub fn mark_active(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Created as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Worker entry point: drain up to `max_drain_per_call` chunks
    ///
    /// Returns true when the ring still holds chunks and this call
    /// re-acquired the worker pin, i.e. the caller must resubmit.
    pub fn drain_for_worker(&self) -> bool {
        {
            let mut inner = self.inner.write();
            let mut drained = 0;
            while drained < self.config.max_drain_per_call && !self.stop.is_stopped() {
                match self.ring.pop(|samples| inner.chain.process(samples)) {
                    None => break,
                    Some(Ok(())) => drained += 1,
                    Some(Err(e)) => {
                        log::error!("session {}: pipeline error: {e}", self.id);
                        break;
                    }
                }
            }
        }

        self.in_worker.store(false, Ordering::Release);
        if self.stop.is_stopped() || self.ring.is_empty() {
            return false;
        }
        // Leftover work: re-pin unless a producer already did.
        !self.in_worker.swap(true, Ordering::AcqRel)
    }

    /// Caller-pumped drain: up to `max_drain_per_call` chunks, returns how
    /// many were processed
    pub fn drain_once(&self) -> usize {
        let mut inner = self.inner.write();
        let mut drained = 0;
        while drained < self.config.max_drain_per_call {
            match self.ring.pop(|samples| inner.chain.process(samples)) {
                None => break,
                Some(Ok(())) => drained += 1,
                Some(Err(e)) => {
                    log::error!("session {}: pipeline error: {e}", self.id);
                    break;
                }
            }
        }
        drained
    }

    /// Drain every queued chunk; caller holds the inner write lock
    pub fn drain_all(&self, inner: &mut SessionInner) {
        while let Some(result) = self.ring.pop(|samples| inner.chain.process(samples)) {
            if let Err(e) = result {
                log::error!("session {}: pipeline error during finalize: {e}", self.id);
                break;
            }
        }
    }

    /// Score the drained features against the attached master
    ///
    /// Reuses the last report while the feature count and master are
    /// unchanged. Fails with `InsufficientData` only when no master is
    /// attached at all.
    pub fn compute_report(&self, inner: &SessionInner) -> EngineResult<SimilarityReport> {
        let master = inner.master.as_ref().ok_or(EngineError::InsufficientData {
            have: 0,
            need: self.config.min_feature_frames,
        })?;

        let mut slot = self.scorer.lock();
        let feature_count = inner.chain.feature_count();
        if let Some(cached) = &slot.cached {
            if cached.feature_count == feature_count
                && cached.master_fingerprint == master.fingerprint
            {
                return Ok(cached.report.clone());
            }
        }

        let (enhanced, harmonic_conf) = inner.chain.enhanced_profile();
        let evidence = UserEvidence {
            features: inner.chain.features(),
            enhanced,
            harmonic_conf,
        };
        let report = slot
            .scorer
            .score(evidence, master, self.config.min_feature_frames)?;
        slot.cached = Some(CachedScore {
            feature_count,
            master_fingerprint: master.fingerprint,
            report: report.clone(),
        });
        Ok(report)
    }

    /// Streaming statistics snapshot
    pub fn stats(&self, chain: ChainStats) -> SessionStats {
        SessionStats {
            total_samples: chain.total_samples,
            total_frames: chain.total_frames,
            feature_frames: chain.voiced_frames,
            duration_seconds: chain.duration_seconds,
            overflow_count: self.overflows.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        let pool = Arc::clone(&self.pool);
        self.ring.reclaim(&pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<SessionShared> {
        let config = SessionConfig::default();
        let pool = Arc::new(BufferPool::new(512, 16, 1_024));
        SessionShared::new(1, config, pool).unwrap()
    }

    fn sine(seconds: f32) -> Vec<f32> {
        (0..(44_100.0 * seconds) as usize)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn starts_created_and_marks_active_once() {
        let session = shared();
        assert_eq!(session.state(), SessionState::Created);
        session.mark_active();
        assert_eq!(session.state(), SessionState::Active);

        session.set_state(SessionState::Finalized);
        session.mark_active();
        assert_eq!(session.state(), SessionState::Finalized);
    }

    #[test]
    fn drain_for_worker_consumes_ring() {
        let session = shared();
        assert!(session.ring.push(&sine(0.25)));
        session.in_worker.store(true, Ordering::Release);

        let resubmit = session.drain_for_worker();
        assert!(!resubmit);
        assert!(session.ring.is_empty());
        assert!(session.inner.read().chain.feature_count() > 0);
    }

    #[test]
    fn drain_respects_per_call_cap() {
        let config = SessionConfig {
            max_drain_per_call: 2,
            ..SessionConfig::default()
        };
        let pool = Arc::new(BufferPool::new(512, 16, 1_024));
        let session = SessionShared::new(2, config, pool).unwrap();

        for _ in 0..4 {
            assert!(session.ring.push(&[0.1; 512]));
        }
        session.in_worker.store(true, Ordering::Release);
        let resubmit = session.drain_for_worker();
        assert!(resubmit, "two chunks remain, worker must resubmit");
        assert_eq!(session.ring.available_read(), 2);
    }

    #[test]
    fn stopped_session_stops_draining() {
        let session = shared();
        session.ring.push(&sine(0.1));
        session.stop.stop();
        session.in_worker.store(true, Ordering::Release);

        assert!(!session.drain_for_worker());
        assert_eq!(session.inner.read().chain.feature_count(), 0);
    }

    #[test]
    fn compute_report_without_master_is_insufficient() {
        let session = shared();
        let inner = session.inner.read();
        assert!(matches!(
            session.compute_report(&inner),
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn drop_returns_ring_buffers() {
        let pool = Arc::new(BufferPool::new(512, 0, 1_024));
        let config = SessionConfig {
            ring_chunks: 8,
            ..SessionConfig::default()
        };
        let session = SessionShared::new(3, config, Arc::clone(&pool)).unwrap();
        assert_eq!(pool.available(), 0);
        drop(session);
        assert_eq!(pool.available(), 8);
    }
}
