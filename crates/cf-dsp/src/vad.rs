//! Energy-gate voice activity detection
//!
//! Four-state machine: `Silence → Candidate → Voiced → Hangover`. Decisions
//! are made once per hop on the mean-square energy of the full analysis
//! window. Frames observed in `Silence` and unconfirmed `Candidate` are
//! gated out of feature extraction but still count toward total duration.

use cf_core::{Sample, VadConfig};

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// Below threshold, nothing forwarded
    Silence,
    /// Above threshold, waiting out `min_voiced_ms`
    Candidate,
    /// Confirmed activity, frames forwarded
    Voiced,
    /// Recently voiced, frames still forwarded until `hangover_ms` elapses
    Hangover,
}

/// Per-session energy gate
#[derive(Debug, Clone)]
pub struct VoiceGate {
    config: VadConfig,
    state: VadState,
    /// Milliseconds accumulated above threshold while in `Candidate`
    candidate_ms: f32,
    /// Milliseconds spent below threshold while in `Hangover`
    hangover_ms: f32,
    /// Wall time of one gate decision (one hop)
    step_ms: f32,
}

impl VoiceGate {
    /// Create a gate stepping once per `hop_size` samples
    pub fn new(config: VadConfig, sample_rate: u32, hop_size: usize) -> Self {
        Self {
            config,
            state: VadState::Silence,
            candidate_ms: 0.0,
            hangover_ms: 0.0,
            step_ms: hop_size as f32 * 1000.0 / sample_rate as f32,
        }
    }

    /// Current state
    pub fn state(&self) -> VadState {
        self.state
    }

    /// Mean-square energy of a frame
    pub fn frame_energy(frame: &[Sample]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32
    }

    /// Advance the gate by one frame; returns whether to forward it
    pub fn offer(&mut self, frame: &[Sample]) -> bool {
        if !self.config.enabled {
            return true;
        }

        let energetic = Self::frame_energy(frame) > self.config.energy_threshold;

        match self.state {
            VadState::Silence => {
                if energetic {
                    self.state = VadState::Candidate;
                    self.candidate_ms = self.step_ms;
                    if self.candidate_ms >= self.config.min_voiced_ms {
                        self.state = VadState::Voiced;
                    }
                }
            }
            VadState::Candidate => {
                if energetic {
                    self.candidate_ms += self.step_ms;
                    if self.candidate_ms >= self.config.min_voiced_ms {
                        self.state = VadState::Voiced;
                    }
                } else {
                    self.state = VadState::Silence;
                    self.candidate_ms = 0.0;
                }
            }
            VadState::Voiced => {
                if !energetic {
                    self.state = VadState::Hangover;
                    self.hangover_ms = self.step_ms;
                    if self.hangover_ms >= self.config.hangover_ms {
                        self.state = VadState::Silence;
                    }
                }
            }
            VadState::Hangover => {
                if energetic {
                    self.state = VadState::Voiced;
                    self.hangover_ms = 0.0;
                } else {
                    self.hangover_ms += self.step_ms;
                    if self.hangover_ms >= self.config.hangover_ms {
                        self.state = VadState::Silence;
                        self.hangover_ms = 0.0;
                    }
                }
            }
        }

        matches!(self.state, VadState::Voiced | VadState::Hangover)
    }

    /// Reset to silence, e.g. between recordings
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.candidate_ms = 0.0;
        self.hangover_ms = 0.0;
    }
}
