//! Chunk-to-frame windowing
//!
//! Turns arbitrary-length sample chunks into `frame_size` windows with
//! `hop_size` stride. A residue buffer carries partial windows between
//! calls, so any chunking of the same stream yields the same frames.

use cf_core::Sample;

/// Residue-carrying framer
#[derive(Debug, Clone)]
pub struct Framer {
    frame_size: usize,
    hop_size: usize,
    residue: Vec<Sample>,
    /// Frames emitted since creation; drives the frame timestamp clock
    emitted: u64,
}

impl Framer {
    /// Framer for validated `frame_size`/`hop_size`
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        Self {
            frame_size,
            hop_size,
            residue: Vec::with_capacity(frame_size * 2),
            emitted: 0,
        }
    }

    /// Frames emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Samples currently carried between calls
    pub fn residue_len(&self) -> usize {
        self.residue.len()
    }

    /// Append samples and emit every complete window to `f`
    ///
    /// `f` receives the window and its index on the hop clock.
    pub fn push<F>(&mut self, samples: &[Sample], mut f: F)
    where
        F: FnMut(&[Sample], u64),
    {
        self.residue.extend_from_slice(samples);
        while self.residue.len() >= self.frame_size {
            f(&self.residue[..self.frame_size], self.emitted);
            self.emitted += 1;
            self.residue.drain(..self.hop_size);
        }
    }

    /// Drop carried samples and restart the frame clock
    pub fn reset(&mut self) {
        self.residue.clear();
        self.emitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_frames(framer: &mut Framer, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        framer.push(samples, |frame, _| out.push(frame.to_vec()));
        out
    }

    #[test]
    fn emits_expected_frame_count() {
        // 1000 samples, frame 512, hop 256 → floor((1000-512)/256)+1 = 2.
        let mut framer = Framer::new(512, 256);
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let frames = collect_frames(&mut framer, &samples);
        assert_eq!(frames.len(), 2);
        assert_eq!(framer.emitted(), 2);
    }

    #[test]
    fn frames_overlap_by_hop() {
        let mut framer = Framer::new(8, 4);
        let samples: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let frames = collect_frames(&mut framer, &samples);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], (0..8).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(frames[1], (4..12).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(frames[2], (8..16).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn chunking_is_invariant() {
        let samples: Vec<f32> = (0..5_000).map(|i| (i as f32 * 0.37).sin()).collect();

        let mut one_shot = Framer::new(512, 256);
        let expected = collect_frames(&mut one_shot, &samples);

        for chunk_len in [1usize, 17, 256, 511, 513, 4_999] {
            let mut framer = Framer::new(512, 256);
            let mut got = Vec::new();
            for chunk in samples.chunks(chunk_len) {
                framer.push(chunk, |frame, _| got.push(frame.to_vec()));
            }
            assert_eq!(got, expected, "chunk size {chunk_len} changed the frames");
        }
    }

    #[test]
    fn residue_stays_bounded() {
        let mut framer = Framer::new(512, 256);
        for chunk in (0..100).map(|_| vec![0.0f32; 77]) {
            framer.push(&chunk, |_, _| {});
            assert!(framer.residue_len() < 512 + 256);
        }
    }

    #[test]
    fn empty_push_emits_nothing() {
        let mut framer = Framer::new(512, 256);
        let frames = collect_frames(&mut framer, &[]);
        assert!(frames.is_empty());
        assert_eq!(framer.residue_len(), 0);
    }

    #[test]
    fn reset_restarts_clock() {
        let mut framer = Framer::new(8, 8);
        framer.push(&[0.0; 8], |_, _| {});
        assert_eq!(framer.emitted(), 1);
        framer.reset();
        assert_eq!(framer.emitted(), 0);
        assert_eq!(framer.residue_len(), 0);
    }
}
