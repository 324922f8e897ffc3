//! Voice activity gate
//!
//! Per-chunk speech/silence filter with a trailing hold-off: the gate closes
//! only after silence has persisted for the hold-off duration, but re-opens
//! immediately on the first loud chunk. Chunks arriving inside the hold-off
//! window are still forwarded, which keeps word endings from being clipped.

use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Peak amplitude below which a chunk counts as silence
    pub threshold: f32,
    /// How long silence must persist before the gate closes
    pub holdoff: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.002,
            holdoff: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug)]
pub struct VoiceGate {
    config: GateConfig,
    active: bool,
    silence_since: Option<Instant>,
}

impl VoiceGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            active: true,
            silence_since: None,
        }
    }

    /// Decide whether a chunk should be forwarded.
    ///
    /// Timer state is plain timestamp arithmetic: each quiet chunk checks the
    /// elapsed time against the hold-off, so there is nothing to cancel when a
    /// loud chunk arrives besides clearing `silence_since`.
    pub fn evaluate(&mut self, samples: &[f32], now: Instant) -> bool {
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));

        if peak >= self.config.threshold {
            self.silence_since = None;
            if !self.active {
                debug!(peak, "voice detected, gate re-armed");
                self.active = true;
            }
            return true;
        }

        if !self.active {
            return false;
        }

        match self.silence_since {
            None => {
                self.silence_since = Some(now);
                true
            }
            Some(since) if now.duration_since(since) >= self.config.holdoff => {
                debug!(peak, "silence hold-off elapsed, gate closed");
                self.active = false;
                self.silence_since = None;
                false
            }
            Some(_) => true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
