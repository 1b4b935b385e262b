/// Core sequencer model - patterns, instruments and shared playhead state
use std::fmt;

use crate::audio::{Material, Voice};
use crate::pitch::{clamp_fill, Scale};

pub mod engine;
pub mod transport;

pub use engine::{SequencerEngine, SequencerEvent};
pub use transport::{Clock, ManualClock, Transport};

/// Steps between beat notifications.
pub const STEPS_PER_BEAT: usize = 4;

/// Which steps of the loop sound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<bool>,
}

impl Pattern {
    pub fn new(len: usize) -> Self {
        Self {
            steps: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, step: usize) -> bool {
        self.steps.get(step).copied().unwrap_or(false)
    }

    pub fn set(&mut self, step: usize, value: bool) {
        if let Some(cell) = self.steps.get_mut(step) {
            *cell = value;
        }
    }

    pub fn toggle(&mut self, step: usize) {
        let current = self.get(step);
        self.set(step, !current);
    }

    pub fn clear(&mut self) {
        self.steps.fill(false);
    }

    /// Every `interval`-th step on, starting at 0.
    pub fn fill_every(&mut self, interval: usize) {
        let interval = interval.max(1);
        for (i, cell) in self.steps.iter_mut().enumerate() {
            *cell = i % interval == 0;
        }
    }

    /// Copy `values`, truncating or padding with `false` to keep the length.
    pub fn assign(&mut self, values: &[bool]) {
        let len = self.steps.len();
        self.steps.clear();
        self.steps.extend(values.iter().copied().take(len));
        self.steps.resize(len, false);
    }

    /// Truncate, or pad with `false`.
    pub fn resize(&mut self, len: usize) {
        self.steps.resize(len, false);
    }

    pub fn steps(&self) -> &[bool] {
        &self.steps
    }

    pub fn active_steps(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(i, _)| i)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentId(u64);

impl InstrumentId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Normalized placement on the stage, both axes in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: clamp_fill(x),
            y: clamp_fill(y),
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

/// A bottle: material, fill level, step pattern and its own voice.
pub struct Instrument {
    id: InstrumentId,
    material: Material,
    fill: f32,
    position: Position,
    pattern: Pattern,
    voice: Box<dyn Voice>,
}

impl Instrument {
    pub(crate) fn new(
        id: InstrumentId,
        material: Material,
        fill: f32,
        position: Position,
        step_count: usize,
        voice: Box<dyn Voice>,
    ) -> Self {
        Self {
            id,
            material,
            fill: clamp_fill(fill),
            position,
            pattern: Pattern::new(step_count),
            voice,
        }
    }

    pub fn id(&self) -> InstrumentId {
        self.id
    }

    pub fn material(&self) -> Material {
        self.material
    }

    pub fn fill(&self) -> f32 {
        self.fill
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub(crate) fn set_fill(&mut self, fill: f32) {
        self.fill = clamp_fill(fill);
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub(crate) fn pattern_mut(&mut self) -> &mut Pattern {
        &mut self.pattern
    }

    pub(crate) fn voice(&self) -> &dyn Voice {
        self.voice.as_ref()
    }

    pub(crate) fn voice_mut(&mut self) -> &mut dyn Voice {
        self.voice.as_mut()
    }

    /// Dispose the current voice, then install the one built by `make`.
    pub(crate) fn swap_voice(
        &mut self,
        material: Material,
        make: impl FnOnce(Material) -> Box<dyn Voice>,
    ) {
        self.voice.dispose();
        self.voice = make(material);
        self.material = material;
    }

    pub(crate) fn dispose(&mut self) {
        self.voice.dispose();
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("id", &self.id)
            .field("material", &self.material)
            .field("fill", &self.fill)
            .field("position", &self.position)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// Shared playhead, tempo and scale for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerState {
    step_count: usize,
    step_index: usize,
    bpm: f32,
    scale: Scale,
    run_state: RunState,
}

impl SequencerState {
    pub fn new(step_count: usize, bpm: f32, scale: Scale) -> Self {
        Self {
            step_count: step_count.max(1),
            step_index: 0,
            bpm,
            scale,
            run_state: RunState::Stopped,
        }
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_playing(&self) -> bool {
        self.run_state == RunState::Running
    }

    pub fn advance_step(&mut self) -> usize {
        self.step_index = (self.step_index + 1) % self.step_count;
        self.step_index
    }

    pub(crate) fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm;
    }

    pub(crate) fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
    }

    pub(crate) fn set_run_state(&mut self, run_state: RunState) {
        self.run_state = run_state;
    }

    /// Wraps the playhead into the new range.
    pub(crate) fn set_step_count(&mut self, step_count: usize) {
        self.step_count = step_count.max(1);
        self.step_index %= self.step_count;
    }
}
