/// Transport - sixteenth-note tick source with tempo glides
use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use crate::config::clamp_bpm;

/// Ticks per beat (sixteenth notes).
pub const SUBDIVISIONS_PER_BEAT: u32 = 4;

/// Upper bound on ticks dispatched by a single poll. Anything beyond is
/// picked up by the next poll, never skipped.
const MAX_TICKS_PER_POLL: usize = 64;

/// A monotonic time source in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.now.set(seconds);
    }

    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoRamp {
    from: f32,
    to: f32,
    start: f64,
    duration: f64,
}

impl TempoRamp {
    fn steady(bpm: f32) -> Self {
        Self {
            from: bpm,
            to: bpm,
            start: 0.0,
            duration: 0.0,
        }
    }

    fn bpm_at(&self, time: f64) -> f32 {
        if self.duration <= 0.0 || time >= self.start + self.duration {
            return self.to;
        }
        if time <= self.start {
            return self.from;
        }
        let progress = ((time - self.start) / self.duration) as f32;
        self.from + (self.to - self.from) * progress
    }
}

/// Produces tick times at one sixteenth note apart for the tempo in effect
/// at each tick.
#[derive(Debug, Clone)]
pub struct Transport {
    ramp: TempoRamp,
    ramp_duration: f64,
    next_tick: Option<f64>,
    last_poll: f64,
}

impl Transport {
    pub fn new(bpm: f32, ramp_duration: f64) -> Self {
        Self {
            ramp: TempoRamp::steady(clamp_bpm(bpm)),
            ramp_duration,
            next_tick: None,
            last_poll: 0.0,
        }
    }

    /// First tick fires at `at`.
    pub fn start(&mut self, at: f64) {
        self.next_tick = Some(at);
    }

    pub fn stop(&mut self) {
        self.next_tick = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// Target tempo.
    pub fn tempo(&self) -> f32 {
        self.ramp.to
    }

    pub fn tempo_at(&self, time: f64) -> f32 {
        self.ramp.bpm_at(time)
    }

    /// Glide from the tempo at the last poll to `bpm`. Ticks already
    /// dispatched keep their times.
    pub fn set_tempo(&mut self, bpm: f32) {
        let bpm = clamp_bpm(bpm);
        let from = self.ramp.bpm_at(self.last_poll);
        self.ramp = TempoRamp {
            from,
            to: bpm,
            start: self.last_poll,
            duration: self.ramp_duration,
        };
        debug!(from, to = bpm, "tempo change");
    }

    pub fn tick_interval_at(&self, time: f64) -> f64 {
        60.0 / (self.tempo_at(time) as f64 * SUBDIVISIONS_PER_BEAT as f64)
    }

    /// Call `on_tick` with the scheduled time of every tick due at or
    /// before `until`, in order.
    pub fn poll(&mut self, now: f64, until: f64, on_tick: &mut dyn FnMut(f64)) {
        self.last_poll = now;
        let mut dispatched = 0;
        while let Some(time) = self.next_tick {
            if time > until || dispatched == MAX_TICKS_PER_POLL {
                break;
            }
            on_tick(time);
            dispatched += 1;
            self.next_tick = Some(time + self.tick_interval_at(time));
        }
    }
}
