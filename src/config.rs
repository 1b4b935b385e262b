/// Session configuration for the sequencer
use crate::pitch::Scale;

pub const DEFAULT_STEP_COUNT: usize = 16;
pub const DEFAULT_MAX_INSTRUMENTS: usize = 7;
pub const DEFAULT_BPM: f32 = 96.0;
pub const MIN_BPM: f32 = 40.0;
pub const MAX_BPM: f32 = 240.0;

/// Values fixed at engine construction. Everything is clamped on write, so a
/// config can never be invalid.
///
/// ```
/// use bottlebeat::{Scale, SequencerConfig};
///
/// let config = SequencerConfig::default()
///     .with_bpm(120.0)
///     .with_scale(Scale::Minor);
/// assert_eq!(config.step_count, 16);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    pub step_count: usize,
    pub max_instruments: usize,
    pub bpm: f32,
    pub scale: Scale,
    /// Seconds between `play()` and the first tick.
    pub start_delay: f64,
    /// How far ahead of the clock ticks are dispatched, in seconds.
    pub lookahead: f64,
    /// Length of the linear tempo glide, in seconds.
    pub tempo_ramp: f64,
    /// Ticks further behind the clock than this still advance the playhead
    /// but schedule no notes.
    pub max_lateness: f64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            step_count: DEFAULT_STEP_COUNT,
            max_instruments: DEFAULT_MAX_INSTRUMENTS,
            bpm: DEFAULT_BPM,
            scale: Scale::default(),
            start_delay: 0.05,
            lookahead: 0.1,
            tempo_ramp: 0.1,
            max_lateness: 0.2,
        }
    }
}

impl SequencerConfig {
    /// Minimum 1.
    pub fn with_step_count(mut self, steps: usize) -> Self {
        self.step_count = steps.max(1);
        self
    }

    pub fn with_max_instruments(mut self, max: usize) -> Self {
        self.max_instruments = max;
        self
    }

    /// Clamped to 40-240.
    pub fn with_bpm(mut self, bpm: f32) -> Self {
        self.bpm = clamp_bpm(bpm);
        self
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_start_delay(mut self, seconds: f64) -> Self {
        self.start_delay = non_negative(seconds);
        self
    }

    pub fn with_lookahead(mut self, seconds: f64) -> Self {
        self.lookahead = non_negative(seconds);
        self
    }

    pub fn with_tempo_ramp(mut self, seconds: f64) -> Self {
        self.tempo_ramp = non_negative(seconds);
        self
    }

    pub fn with_max_lateness(mut self, seconds: f64) -> Self {
        self.max_lateness = non_negative(seconds);
        self
    }
}

pub fn clamp_bpm(bpm: f32) -> f32 {
    if bpm.is_nan() {
        return DEFAULT_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

fn non_negative(seconds: f64) -> f64 {
    if seconds.is_nan() {
        0.0
    } else {
        seconds.max(0.0)
    }
}
