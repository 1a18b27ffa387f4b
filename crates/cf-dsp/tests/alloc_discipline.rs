//! Hot-path allocation discipline
//!
//! Extraction must not touch the heap after construction. A counting
//! allocator is installed for this whole test binary; tracking is switched
//! on only around the extraction loop.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cf_core::SessionConfig;
use cf_dsp::{MfccExtractor, VoiceGate};

struct CountingAllocator;

static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static TRACKING: AtomicBool = AtomicBool::new(false);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if TRACKING.load(Ordering::Relaxed) {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

#[test]
fn extraction_does_not_allocate() {
    let config = SessionConfig::default();
    let mut extractor = MfccExtractor::new(&config).unwrap();
    let mut gate = VoiceGate::new(config.vad.clone(), config.sample_rate, config.hop_size);

    let frame: Vec<f32> = (0..config.frame_size)
        .map(|i| {
            0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / config.sample_rate as f32).sin()
        })
        .collect();
    let mut coeffs = vec![0.0f32; config.mfcc_coeffs];

    // Warm up once outside the tracked window.
    gate.offer(&frame);
    extractor.extract(&frame, &mut coeffs).unwrap();

    ALLOCATIONS.store(0, Ordering::SeqCst);
    TRACKING.store(true, Ordering::SeqCst);

    for _ in 0..256 {
        gate.offer(&frame);
        extractor.extract(&frame, &mut coeffs).unwrap();
    }

    TRACKING.store(false, Ordering::SeqCst);
    let count = ALLOCATIONS.load(Ordering::SeqCst);

    assert_eq!(count, 0, "per-frame path allocated {count} times");
}
