//! Cooperative cancellation token

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable stop flag checked by pipeline workers between frames
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// A token in the running state
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder to stop
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether stop has been signaled
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
