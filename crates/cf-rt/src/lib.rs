//! cf-rt: Real-time primitives for the CallForge pipeline
//!
//! - [`ChunkRing`]: wait-free SPSC chunk queue between the ingest caller and
//!   the pipeline worker; a full ring reports overflow instead of blocking
//! - [`BufferPool`]: pre-allocated fixed-size float buffers, lock-free along
//!   the acquire/release path
//! - [`StopToken`]: cooperative cancellation for session teardown

pub mod pool;
pub mod ring;
pub mod stop;

pub use pool::BufferPool;
pub use ring::ChunkRing;
pub use stop::StopToken;
