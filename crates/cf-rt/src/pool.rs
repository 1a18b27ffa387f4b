//! Pre-allocated float buffer pool
//!
//! Fixed-size buffers cycle through a bounded lock-free freelist; the only
//! lock sits on the grow path, which is bounded by the pool cap. Sessions
//! draw their ring slots here and return them on destroy.

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use cf_core::{EngineError, EngineResult, Sample};

/// Shared pool of `buf_len`-sample float buffers
pub struct BufferPool {
    free_tx: Sender<Box<[Sample]>>,
    free_rx: Receiver<Box<[Sample]>>,
    buf_len: usize,
    max_buffers: usize,
    /// Buffers handed out over the pool's lifetime; guarded because grow
    /// decisions must be exact, not approximate
    allocated: Mutex<usize>,
}

impl BufferPool {
    /// Pool of `initial` buffers, growable up to `max_buffers`
    pub fn new(buf_len: usize, initial: usize, max_buffers: usize) -> Self {
        let max_buffers = max_buffers.max(initial).max(1);
        let (free_tx, free_rx) = bounded(max_buffers);
        for _ in 0..initial {
            // Channel capacity equals the cap, so these sends cannot fail.
            let _ = free_tx.send(vec![0.0; buf_len].into_boxed_slice());
        }
        Self {
            free_tx,
            free_rx,
            buf_len,
            max_buffers,
            allocated: Mutex::new(initial),
        }
    }

    /// Length of every buffer in the pool
    pub fn buf_len(&self) -> usize {
        self.buf_len
    }

    /// Buffers currently sitting in the freelist
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Take a buffer, growing the pool if the cap allows
    pub fn acquire(&self) -> EngineResult<Box<[Sample]>> {
        if let Ok(buf) = self.free_rx.try_recv() {
            return Ok(buf);
        }

        let mut allocated = self.allocated.lock();
        if *allocated >= self.max_buffers {
            return Err(EngineError::ResourceExhausted {
                reason: format!("buffer pool cap of {} reached", self.max_buffers),
            });
        }
        *allocated += 1;
        log::debug!("buffer pool grew to {} buffers", *allocated);
        Ok(vec![0.0; self.buf_len].into_boxed_slice())
    }

    /// Return a buffer to the freelist
    pub fn release(&self, buf: Box<[Sample]>) {
        debug_assert_eq!(buf.len(), self.buf_len);
        // Capacity equals the cap, so this only drops a buffer if a foreign
        // one was handed back.
        let _ = self.free_tx.try_send(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_released_buffers() {
        let pool = BufferPool::new(64, 2, 4);
        assert_eq!(pool.available(), 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);

        pool.release(a);
        assert_eq!(pool.available(), 1);
        let c = pool.acquire().unwrap();
        assert_eq!(c.len(), 64);
        pool.release(b);
        pool.release(c);
    }

    #[test]
    fn grows_until_cap_then_exhausts() {
        let pool = BufferPool::new(16, 1, 3);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap(); // grow to 2
        let c = pool.acquire().unwrap(); // grow to 3
        assert!(matches!(
            pool.acquire(),
            Err(EngineError::ResourceExhausted { .. })
        ));
        pool.release(a);
        assert!(pool.acquire().is_ok());
        pool.release(b);
        pool.release(c);
    }

    #[test]
    fn released_buffers_survive_round_trips() {
        let pool = BufferPool::new(8, 1, 1);
        for _ in 0..100 {
            let buf = pool.acquire().unwrap();
            pool.release(buf);
        }
        assert_eq!(pool.available(), 1);
    }
}
