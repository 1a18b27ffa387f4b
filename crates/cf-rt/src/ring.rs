//! Single-producer single-consumer chunk ring
//!
//! Transfers caller-supplied sample chunks from the ingest thread to the
//! pipeline worker. Slots are fixed-length buffers drawn from the
//! [`BufferPool`](crate::BufferPool); a submitted chunk spreads across as
//! many slots as it needs, and a full ring rejects the whole chunk rather
//! than blocking or splitting it.
//!
//! The producer side must never stall the caller. Push and pop are
//! wait-free: one atomic load pair, a copy, one release store.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use cf_core::{EngineResult, Sample};

use crate::pool::BufferPool;

/// One ring slot: a pool buffer plus the valid prefix length
struct Slot {
    data: Box<[Sample]>,
    len: usize,
}

/// SPSC ring of sample chunks
pub struct ChunkRing {
    slots: Box<[UnsafeCell<Slot>]>,
    capacity: usize,
    mask: usize,
    chunk_len: usize,
    /// Only advanced by the producer
    write_pos: AtomicUsize,
    /// Only advanced by the consumer
    read_pos: AtomicUsize,
}

// SAFETY: write_pos/read_pos partition slot ownership between exactly one
// producer and one consumer; a slot is only touched by the side that
// currently owns it.
unsafe impl Send for ChunkRing {}
unsafe impl Sync for ChunkRing {}

impl ChunkRing {
    /// Ring with `min_capacity` slots (rounded up to a power of two) of
    /// `chunk_len` samples each, drawn from `pool`
    pub fn new(min_capacity: usize, chunk_len: usize, pool: &BufferPool) -> EngineResult<Self> {
        let capacity = min_capacity.max(1).next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(Slot {
                data: pool.acquire()?,
                len: 0,
            }));
        }
        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            chunk_len,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        })
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free for the producer
    #[inline]
    pub fn available_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity - write.wrapping_sub(read)
    }

    /// Slots ready for the consumer
    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// True when nothing is queued
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Enqueue a chunk (producer side)
    ///
    /// Returns `false` without touching the ring when the chunk does not
    /// fit in the free slots; the caller surfaces that as `Overflow`.
    pub fn push(&self, samples: &[Sample]) -> bool {
        if samples.is_empty() {
            return true;
        }
        let needed = samples.len().div_ceil(self.chunk_len);
        if needed > self.available_write() {
            return false;
        }

        let mut write = self.write_pos.load(Ordering::Relaxed);
        for piece in samples.chunks(self.chunk_len) {
            let idx = write & self.mask;
            // SAFETY: slots in [write, read + capacity) belong to the
            // producer; we checked there is room for every piece.
            unsafe {
                let slot = &mut *self.slots[idx].get();
                slot.data[..piece.len()].copy_from_slice(piece);
                slot.len = piece.len();
            }
            write = write.wrapping_add(1);
        }
        self.write_pos.store(write, Ordering::Release);
        true
    }

    /// Dequeue one chunk (consumer side), handing its samples to `f`
    pub fn pop<R>(&self, f: impl FnOnce(&[Sample]) -> R) -> Option<R> {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        if write == read {
            return None;
        }
        let idx = read & self.mask;
        // SAFETY: slots in [read, write) belong to the consumer.
        let result = unsafe {
            let slot = &*self.slots[idx].get();
            f(&slot.data[..slot.len])
        };
        self.read_pos.store(read.wrapping_add(1), Ordering::Release);
        Some(result)
    }

    /// Drop everything queued (consumer side)
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }

    /// Tear down, returning every slot buffer to `pool`
    pub fn dispose(self, pool: &BufferPool) {
        for cell in self.slots.into_vec() {
            let slot = cell.into_inner();
            if !slot.data.is_empty() {
                pool.release(slot.data);
            }
        }
    }

    /// In-place teardown for rings that cannot be moved out of their owner
    ///
    /// Empties every slot into `pool`; the ring must not be used afterwards.
    pub fn reclaim(&mut self, pool: &BufferPool) {
        for cell in self.slots.iter_mut() {
            let slot = cell.get_mut();
            let data = std::mem::replace(&mut slot.data, Vec::new().into_boxed_slice());
            if !data.is_empty() {
                pool.release(data);
            }
            slot.len = 0;
        }
        self.clear();
    }
}
