/// Sequencer engine - runs transport ticks against the instrument set
use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, trace, warn};

use super::transport::{Clock, Transport};
use super::{Instrument, InstrumentId, Position, RunState, SequencerState, STEPS_PER_BEAT};
use crate::audio::{trigger, Material, VoiceFactory};
use crate::config::{clamp_bpm, SequencerConfig};
use crate::pitch::{fill_to_frequency, Scale};

/// Notifications are dropped oldest-first beyond this many.
const MAX_PENDING_EVENTS: usize = 256;

/// Notifications for whoever draws the playhead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SequencerEvent {
    StepAdvanced { step: usize, time: f64 },
    /// Every fourth step.
    Beat { step: usize, time: f64 },
}

/// Owns the instruments, the shared state and the transport.
///
/// Everything runs on the caller's thread: call [`process`](Self::process)
/// regularly and it dispatches every tick due within the lookahead window,
/// scheduling notes at each tick's exact time. Ticks that fell more than
/// `max_lateness` behind the clock (the host stopped calling `process` for a
/// while) still advance the playhead but stay silent.
///
/// ```
/// use bottlebeat::audio::{Material, ScheduledNote, Voice, VoiceFactory};
/// use bottlebeat::{ManualClock, Position, SequencerConfig, SequencerEngine, VoiceError};
///
/// struct Silent(bool);
///
/// impl Voice for Silent {
///     fn schedule(&mut self, _: ScheduledNote) -> Result<(), VoiceError> { Ok(()) }
///     fn dispose(&mut self) { self.0 = true; }
///     fn is_disposed(&self) -> bool { self.0 }
/// }
///
/// struct Factory;
///
/// impl VoiceFactory for Factory {
///     fn create_voice(&mut self, _: Material) -> Box<dyn Voice> {
///         Box::new(Silent(false))
///     }
/// }
///
/// let clock = ManualClock::new();
/// let mut engine = SequencerEngine::new(SequencerConfig::default(), Factory, clock.clone());
/// let id = engine
///     .create_instrument(Material::Water, 0.5, Position::default())
///     .unwrap();
/// engine.toggle_pattern_step(id, 1);
/// engine.unlock_audio();
/// engine.play();
/// clock.advance(1.0);
/// engine.process();
/// assert!(!engine.poll_events().is_empty());
/// ```
pub struct SequencerEngine<F: VoiceFactory, C: Clock> {
    config: SequencerConfig,
    state: SequencerState,
    transport: Transport,
    instruments: Vec<Instrument>,
    next_id: u64,
    factory: F,
    clock: C,
    audio_unlocked: bool,
    events: VecDeque<SequencerEvent>,
}

impl<F: VoiceFactory, C: Clock> SequencerEngine<F, C> {
    pub fn new(config: SequencerConfig, factory: F, clock: C) -> Self {
        let bpm = clamp_bpm(config.bpm);
        Self {
            state: SequencerState::new(config.step_count, bpm, config.scale),
            transport: Transport::new(bpm, config.tempo_ramp),
            instruments: Vec::new(),
            next_id: 1,
            factory,
            clock,
            audio_unlocked: false,
            events: VecDeque::new(),
            config,
        }
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn step_index(&self) -> usize {
        self.state.step_index()
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> + '_ {
        self.instruments.iter()
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.id() == id)
    }

    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_full(&self) -> bool {
        self.instruments.len() >= self.config.max_instruments
    }

    // --- Audio gate ---

    /// Called once the user has enabled sound. Until then every trigger,
    /// scheduled or manual, is silently skipped.
    pub fn unlock_audio(&mut self) {
        if !self.audio_unlocked {
            self.audio_unlocked = true;
            debug!("audio unlocked");
        }
    }

    pub fn is_audio_unlocked(&self) -> bool {
        self.audio_unlocked
    }

    // --- Transport ---

    /// Resume from the current step.
    pub fn play(&mut self) {
        if self.state.is_playing() {
            return;
        }
        let at = self.clock.now() + self.config.start_delay;
        self.transport.start(at);
        self.state.set_run_state(RunState::Running);
        debug!(at, step = self.state.step_index(), "play");
    }

    /// Stop ticking. Notes already scheduled still sound; the playhead and
    /// patterns are kept.
    pub fn stop(&mut self) {
        if !self.state.is_playing() {
            return;
        }
        self.transport.stop();
        self.state.set_run_state(RunState::Stopped);
        debug!(step = self.state.step_index(), "stop");
    }

    pub fn toggle_play(&mut self) {
        if self.state.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    /// Glides to the new tempo; applies from the next tick on.
    pub fn set_tempo(&mut self, bpm: f32) {
        let bpm = clamp_bpm(bpm);
        self.transport.set_tempo(bpm);
        self.state.set_bpm(bpm);
    }

    pub fn set_scale(&mut self, scale: Scale) {
        self.state.set_scale(scale);
        debug!(%scale, "scale changed");
    }

    /// Unknown names select the default scale.
    pub fn set_scale_by_name(&mut self, name: &str) {
        self.set_scale(Scale::from_name(name));
    }

    /// Resize every pattern to `step_count` (truncating or padding with
    /// off steps) and wrap the playhead into range.
    pub fn set_step_count(&mut self, step_count: usize) {
        self.state.set_step_count(step_count);
        let len = self.state.step_count();
        for instrument in &mut self.instruments {
            instrument.pattern_mut().resize(len);
        }
        debug!(step_count = len, "step count changed");
    }

    /// Dispatch every tick due up to now plus the lookahead. Returns the
    /// number of ticks processed.
    pub fn process(&mut self) -> usize {
        let now = self.clock.now();
        let mut due = Vec::new();
        self.transport
            .poll(now, now + self.config.lookahead, &mut |time| due.push(time));
        let late_before = now - self.config.max_lateness;
        let late = due.iter().filter(|&&time| time < late_before).count();
        if late > 0 {
            debug!(late, now, "catching up on late ticks without sound");
        }
        for &time in &due {
            self.tick(time, time >= late_before);
        }
        due.len()
    }

    pub fn poll_events(&mut self) -> Vec<SequencerEvent> {
        self.events.drain(..).collect()
    }

    fn tick(&mut self, time: f64, audible: bool) {
        if !self.state.is_playing() {
            return;
        }
        let step = self.state.advance_step();
        trace!(step, time, audible, "tick");

        if self.audio_unlocked && audible {
            let scale = self.state.scale();
            for instrument in &mut self.instruments {
                if !instrument.pattern().get(step) {
                    continue;
                }
                if instrument.voice().is_disposed() {
                    trace!(id = %instrument.id(), "skipping disposed voice");
                    continue;
                }
                let frequency = fill_to_frequency(instrument.fill(), scale);
                let material = instrument.material();
                if let Err(err) = trigger(instrument.voice_mut(), material, frequency, time) {
                    warn!(id = %instrument.id(), %material, step, "voice fault: {}", err);
                }
            }
        }

        self.push_event(SequencerEvent::StepAdvanced { step, time });
        if step % STEPS_PER_BEAT == 0 {
            self.push_event(SequencerEvent::Beat { step, time });
        }
    }

    fn push_event(&mut self, event: SequencerEvent) {
        if self.events.len() == MAX_PENDING_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    // --- Instruments ---

    /// `None` once the instrument cap is reached.
    pub fn create_instrument(
        &mut self,
        material: Material,
        fill: f32,
        position: Position,
    ) -> Option<InstrumentId> {
        if self.is_full() {
            debug!(max = self.config.max_instruments, "instrument cap reached");
            return None;
        }
        let id = InstrumentId(self.next_id);
        self.next_id += 1;

        let voice = self.factory.create_voice(material);
        let instrument = Instrument::new(
            id,
            material,
            fill,
            position,
            self.state.step_count(),
            voice,
        );
        debug!(%id, %material, fill = instrument.fill(), "instrument created");
        self.instruments.push(instrument);
        Some(id)
    }

    /// Random material, fill in [0.15, 0.85) and a random spot on stage.
    pub fn add_random_instrument<R: Rng>(&mut self, rng: &mut R) -> Option<InstrumentId> {
        if self.is_full() {
            return None;
        }
        let material = *Material::ALL.choose(rng)?;
        let fill = rng.gen_range(0.15..0.85);
        let position = Position::new(rng.gen_range(0.1..0.9), rng.gen_range(0.25..0.85));
        self.create_instrument(material, fill, position)
    }

    /// The starting scene: one water and one beads bottle.
    pub fn seed_scene(&mut self) {
        self.create_instrument(Material::Water, 0.45, Position::new(0.35, 0.66));
        self.create_instrument(Material::Beads, 0.65, Position::new(0.65, 0.58));
    }

    /// Disposes the voice, then drops the instrument.
    pub fn remove_instrument(&mut self, id: InstrumentId) -> bool {
        let Some(index) = self.instruments.iter().position(|i| i.id() == id) else {
            return false;
        };
        self.instruments[index].dispose();
        self.instruments.remove(index);
        debug!(%id, "instrument removed");
        true
    }

    pub fn set_fill(&mut self, id: InstrumentId, fill: f32) -> bool {
        self.with_instrument(id, |i| i.set_fill(fill))
    }

    /// Relative change, e.g. from a vertical drag.
    pub fn adjust_fill(&mut self, id: InstrumentId, delta: f32) -> bool {
        self.with_instrument(id, |i| i.set_fill(i.fill() + delta))
    }

    pub fn set_position(&mut self, id: InstrumentId, position: Position) -> bool {
        self.with_instrument(id, |i| i.set_position(position))
    }

    /// Swaps the voice: the old one is disposed before the new one is built.
    /// Setting the current material again keeps the voice.
    pub fn set_material(&mut self, id: InstrumentId, material: Material) -> bool {
        let Some(instrument) = self.instruments.iter_mut().find(|i| i.id() == id) else {
            return false;
        };
        if instrument.material() == material {
            return true;
        }
        let factory = &mut self.factory;
        let previous = instrument.material();
        instrument.swap_voice(material, |m| factory.create_voice(m));
        debug!(%id, from = %previous, to = %material, "material changed");
        true
    }

    pub fn toggle_pattern_step(&mut self, id: InstrumentId, step: usize) -> bool {
        self.with_instrument(id, |i| i.pattern_mut().toggle(step))
    }

    /// Extra values are ignored, missing ones read as off.
    pub fn set_pattern(&mut self, id: InstrumentId, steps: &[bool]) -> bool {
        self.with_instrument(id, |i| i.pattern_mut().assign(steps))
    }

    /// One hit per beat.
    pub fn seed_pattern(&mut self, id: InstrumentId) -> bool {
        self.with_instrument(id, |i| i.pattern_mut().fill_every(STEPS_PER_BEAT))
    }

    pub fn clear_pattern(&mut self, id: InstrumentId) -> bool {
        self.with_instrument(id, |i| i.pattern_mut().clear())
    }

    /// Play one instrument right now, playing or not. Returns whether a note
    /// was scheduled.
    pub fn audition_instrument(&mut self, id: InstrumentId) -> bool {
        if !self.audio_unlocked {
            return false;
        }
        let now = self.clock.now();
        let scale = self.state.scale();
        let Some(instrument) = self.instruments.iter_mut().find(|i| i.id() == id) else {
            return false;
        };
        if instrument.voice().is_disposed() {
            return false;
        }
        let frequency = fill_to_frequency(instrument.fill(), scale);
        let material = instrument.material();
        match trigger(instrument.voice_mut(), material, frequency, now) {
            Ok(()) => true,
            Err(err) => {
                warn!(%id, %material, "audition failed: {}", err);
                false
            }
        }
    }

    fn with_instrument(&mut self, id: InstrumentId, f: impl FnOnce(&mut Instrument)) -> bool {
        match self.instruments.iter_mut().find(|i| i.id() == id) {
            Some(instrument) => {
                f(instrument);
                true
            }
            None => false,
        }
    }
}

impl<F: VoiceFactory, C: Clock> Drop for SequencerEngine<F, C> {
    fn drop(&mut self) {
        for instrument in &mut self.instruments {
            instrument.dispose();
        }
    }
}
