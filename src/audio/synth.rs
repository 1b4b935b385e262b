/// Per-material synthesis, rendered on the audio thread
///
/// The control side only ever talks to the renderer through
/// [`RenderCommand`]s. Notes are held until the frame matching their
/// scheduled time and dropped if their voice key went stale meanwhile.
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use slotmap::SecondaryMap;
use tracing::trace;

use super::voice::{Material, ScheduledNote, Timbre, VoiceKey, VoiceProfile};

const MASTER_GAIN: f32 = 0.5;
const AM_HARMONICITY: f32 = 3.0;
const PLUCK_DAMPING: f32 = 0.996;
const MAX_DELAY_LINE: usize = 4096;

#[derive(Debug)]
pub(crate) enum RenderCommand {
    Create { key: VoiceKey, material: Material },
    Play { key: VoiceKey, note: ScheduledNote },
    Release { key: VoiceKey },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Linear ADSR.
struct Envelope {
    stage: Stage,
    level: f32,
    attack_step: f32,
    decay_step: f32,
    sustain: f32,
    release_frames: f32,
    release_step: f32,
}

impl Envelope {
    fn new(profile: &VoiceProfile, sample_rate: f32) -> Self {
        Self {
            stage: Stage::Idle,
            level: 0.0,
            attack_step: 1.0 / (profile.attack * sample_rate).max(1.0),
            decay_step: (1.0 - profile.sustain) / (profile.decay * sample_rate).max(1.0),
            sustain: profile.sustain,
            release_frames: (profile.release * sample_rate).max(1.0),
            release_step: 0.0,
        }
    }

    fn gate_on(&mut self) {
        self.stage = Stage::Attack;
    }

    fn gate_off(&mut self) {
        if !matches!(self.stage, Stage::Idle | Stage::Release) {
            self.stage = Stage::Release;
            self.release_step = self.level / self.release_frames;
        }
    }

    fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    fn next(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => {}
            Stage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= self.decay_step;
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = if self.sustain > 0.0 {
                        Stage::Sustain
                    } else {
                        Stage::Idle
                    };
                }
            }
            Stage::Sustain => {}
            Stage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }
}

enum Oscillator {
    Tonal {
        frequency: f32,
        carrier: f32,
        modulator: f32,
    },
    Pluck {
        delay_line: Vec<f32>,
        position: usize,
    },
    Noise {
        rng_state: u32,
        brown: Option<f32>,
    },
}

impl Oscillator {
    fn new(timbre: Timbre) -> Self {
        match timbre {
            Timbre::Tonal => Oscillator::Tonal {
                frequency: 440.0,
                carrier: 0.0,
                modulator: 0.0,
            },
            Timbre::Pluck => Oscillator::Pluck {
                delay_line: Vec::with_capacity(MAX_DELAY_LINE),
                position: 0,
            },
            Timbre::WhiteNoise => Oscillator::Noise {
                rng_state: 22695477,
                brown: None,
            },
            Timbre::BrownNoise => Oscillator::Noise {
                rng_state: 1103515245,
                brown: Some(0.0),
            },
        }
    }

    fn strike(&mut self, frequency: Option<f32>, sample_rate: f32) {
        match self {
            Oscillator::Tonal {
                frequency: current, ..
            } => {
                if let Some(f) = frequency {
                    *current = f;
                }
            }
            Oscillator::Pluck {
                delay_line,
                position,
            } => {
                let f = frequency.unwrap_or(440.0);
                let len = ((sample_rate / f) as usize).clamp(2, MAX_DELAY_LINE);
                let mut rng_state = (f as u32).wrapping_mul(1664525).wrapping_add(1013904223);
                delay_line.clear();
                delay_line.extend((0..len).map(|_| white(&mut rng_state)));
                *position = 0;
            }
            Oscillator::Noise { .. } => {}
        }
    }

    fn next(&mut self, sample_rate: f32) -> f32 {
        match self {
            Oscillator::Tonal {
                frequency,
                carrier,
                modulator,
            } => {
                let out = (*carrier * TAU).sin() * (0.5 + 0.5 * (*modulator * TAU).sin());
                *carrier = (*carrier + *frequency / sample_rate).fract();
                *modulator = (*modulator + *frequency * AM_HARMONICITY / sample_rate).fract();
                out
            }
            Oscillator::Pluck {
                delay_line,
                position,
            } => {
                if delay_line.is_empty() {
                    return 0.0;
                }
                let len = delay_line.len();
                let out = delay_line[*position];
                let next = delay_line[(*position + 1) % len];
                delay_line[*position] = (out + next) * 0.5 * PLUCK_DAMPING;
                *position = (*position + 1) % len;
                out
            }
            Oscillator::Noise { rng_state, brown } => {
                let w = white(rng_state);
                match brown {
                    Some(level) => {
                        *level = (*level + 0.02 * w) / 1.02;
                        *level * 3.5
                    }
                    None => w,
                }
            }
        }
    }
}

fn white(rng_state: &mut u32) -> f32 {
    *rng_state = rng_state.wrapping_mul(1664525).wrapping_add(1013904223);
    (*rng_state as f32 / u32::MAX as f32) * 2.0 - 1.0
}

/// One voice slot on the audio thread.
struct Synth {
    envelope: Envelope,
    oscillator: Oscillator,
    gate_frames: u64,
    velocity: f32,
}

impl Synth {
    fn new(material: Material, sample_rate: f32) -> Self {
        let profile = material.profile();
        Self {
            envelope: Envelope::new(profile, sample_rate),
            oscillator: Oscillator::new(profile.timbre),
            gate_frames: 0,
            velocity: 0.0,
        }
    }

    fn note_on(&mut self, note: &ScheduledNote, sample_rate: f32) {
        self.oscillator.strike(note.frequency, sample_rate);
        self.envelope.gate_on();
        self.gate_frames = (note.duration * sample_rate as f64).round() as u64;
        self.velocity = note.velocity;
    }

    fn next(&mut self, sample_rate: f32) -> f32 {
        if self.envelope.is_idle() {
            return 0.0;
        }
        if self.gate_frames == 0 {
            self.envelope.gate_off();
        } else {
            self.gate_frames -= 1;
        }
        let level = self.envelope.next();
        self.oscillator.next(sample_rate) * level * self.velocity
    }
}

struct PendingNote {
    key: VoiceKey,
    note: ScheduledNote,
    start_frame: u64,
}

/// Mixes every live voice into a mono stream.
pub(crate) struct Renderer {
    sample_rate: f32,
    commands: Receiver<RenderCommand>,
    synths: SecondaryMap<VoiceKey, Synth>,
    pending: Vec<PendingNote>,
    frame: u64,
    frames_rendered: Arc<AtomicU64>,
}

impl Renderer {
    pub(crate) fn new(
        sample_rate: f32,
        commands: Receiver<RenderCommand>,
        frames_rendered: Arc<AtomicU64>,
    ) -> Self {
        Self {
            sample_rate,
            commands,
            synths: SecondaryMap::new(),
            pending: Vec::new(),
            frame: 0,
            frames_rendered,
        }
    }

    pub(crate) fn process(&mut self, output: &mut [f32]) {
        self.drain_commands();

        for sample in output.iter_mut() {
            while self
                .pending
                .first()
                .is_some_and(|p| p.start_frame <= self.frame)
            {
                let pending = self.pending.remove(0);
                self.start(pending);
            }

            let mut mix = 0.0;
            for synth in self.synths.values_mut() {
                mix += synth.next(self.sample_rate);
            }
            *sample = (mix * MASTER_GAIN).clamp(-1.0, 1.0);
            self.frame += 1;
        }

        self.frames_rendered.store(self.frame, Ordering::Release);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RenderCommand::Create { key, material } => {
                    self.synths.insert(key, Synth::new(material, self.sample_rate));
                }
                RenderCommand::Play { key, note } => {
                    let start_frame = (note.at.max(0.0) * self.sample_rate as f64).round() as u64;
                    let index = self.pending.partition_point(|p| p.start_frame <= start_frame);
                    self.pending.insert(
                        index,
                        PendingNote {
                            key,
                            note,
                            start_frame,
                        },
                    );
                }
                RenderCommand::Release { key } => {
                    self.synths.remove(key);
                }
            }
        }
    }

    fn start(&mut self, pending: PendingNote) {
        match self.synths.get_mut(pending.key) {
            Some(synth) => synth.note_on(&pending.note, self.sample_rate),
            None => trace!(key = ?pending.key, "dropping note for stale voice"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use std::sync::mpsc::{channel, Sender};

    const RATE: f32 = 8000.0;

    fn renderer() -> (Renderer, Sender<RenderCommand>, Arc<AtomicU64>) {
        let (sender, receiver) = channel();
        let frames = Arc::new(AtomicU64::new(0));
        (Renderer::new(RATE, receiver, Arc::clone(&frames)), sender, frames)
    }

    fn note(frequency: Option<f32>, at: f64, duration: f64) -> ScheduledNote {
        ScheduledNote {
            frequency,
            at,
            duration,
            velocity: 0.8,
        }
    }

    fn peak(buffer: &[f32]) -> f32 {
        buffer.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// A key that was released, and the live key that reused its slot.
    fn stale_and_reused(keys: &mut SlotMap<VoiceKey, ()>) -> (VoiceKey, VoiceKey) {
        let stale = keys.insert(());
        keys.remove(stale);
        (stale, keys.insert(()))
    }

    #[test]
    fn test_silent_without_notes() {
        let (mut renderer, sender, frames) = renderer();
        let key = SlotMap::<VoiceKey, ()>::with_key().insert(());
        sender
            .send(RenderCommand::Create {
                key,
                material: Material::Water,
            })
            .unwrap();
        let mut buffer = vec![1.0; 256];
        renderer.process(&mut buffer);
        assert_eq!(peak(&buffer), 0.0);
        assert_eq!(frames.load(Ordering::Acquire), 256);
    }

    #[test]
    fn test_note_starts_at_scheduled_frame() {
        let (mut renderer, sender, _) = renderer();
        let key = SlotMap::<VoiceKey, ()>::with_key().insert(());
        sender
            .send(RenderCommand::Create {
                key,
                material: Material::Water,
            })
            .unwrap();
        sender
            .send(RenderCommand::Play {
                key,
                note: note(Some(440.0), 0.1, 0.25),
            })
            .unwrap();

        let mut before = vec![0.0; 800];
        renderer.process(&mut before);
        assert_eq!(peak(&before), 0.0);

        let mut after = vec![0.0; 800];
        renderer.process(&mut after);
        assert!(peak(&after) > 0.01);
    }

    #[test]
    fn test_every_material_sounds() {
        let mut keys = SlotMap::<VoiceKey, ()>::with_key();
        for material in Material::ALL {
            let (mut renderer, sender, _) = renderer();
            let key = keys.insert(());
            sender.send(RenderCommand::Create { key, material }).unwrap();
            sender
                .send(RenderCommand::Play {
                    key,
                    note: note(Some(330.0), 0.0, material.profile().duration),
                })
                .unwrap();
            let mut buffer = vec![0.0; 400];
            renderer.process(&mut buffer);
            assert!(peak(&buffer) > 0.0, "{material} was silent");
            assert!(peak(&buffer) <= 1.0);
        }
    }

    #[test]
    fn test_noise_decays_to_silence() {
        let (mut renderer, sender, _) = renderer();
        let key = SlotMap::<VoiceKey, ()>::with_key().insert(());
        sender
            .send(RenderCommand::Create {
                key,
                material: Material::Rice,
            })
            .unwrap();
        sender
            .send(RenderCommand::Play {
                key,
                note: note(None, 0.0, 0.03),
            })
            .unwrap();
        let mut buffer = vec![0.0; 8000];
        renderer.process(&mut buffer);
        assert!(peak(&buffer[..400]) > 0.0);
        assert_eq!(peak(&buffer[4000..]), 0.0);
    }

    #[test]
    fn test_released_voice_drops_pending_note() {
        let (mut renderer, sender, _) = renderer();
        let mut keys = SlotMap::<VoiceKey, ()>::with_key();
        let (stale, reused) = stale_and_reused(&mut keys);
        sender
            .send(RenderCommand::Create {
                key: stale,
                material: Material::Beads,
            })
            .unwrap();
        sender
            .send(RenderCommand::Play {
                key: stale,
                note: note(Some(220.0), 0.05, 0.2),
            })
            .unwrap();
        sender.send(RenderCommand::Release { key: stale }).unwrap();
        // Slot reused by a newer voice before the note is due.
        sender
            .send(RenderCommand::Create {
                key: reused,
                material: Material::Beads,
            })
            .unwrap();

        let mut buffer = vec![0.0; 2000];
        renderer.process(&mut buffer);
        assert_eq!(peak(&buffer), 0.0);
    }

    #[test]
    fn test_stale_release_keeps_new_voice() {
        let (mut renderer, sender, _) = renderer();
        let mut keys = SlotMap::<VoiceKey, ()>::with_key();
        let (stale, reused) = stale_and_reused(&mut keys);
        sender
            .send(RenderCommand::Create {
                key: reused,
                material: Material::Water,
            })
            .unwrap();
        sender.send(RenderCommand::Release { key: stale }).unwrap();
        sender
            .send(RenderCommand::Play {
                key: reused,
                note: note(Some(440.0), 0.0, 0.25),
            })
            .unwrap();
        let mut buffer = vec![0.0; 400];
        renderer.process(&mut buffer);
        assert!(peak(&buffer) > 0.0);
    }

    #[test]
    fn test_envelope_shape() {
        let profile = Material::Water.profile();
        let mut env = Envelope::new(profile, RATE);
        env.gate_on();
        let peak_level = (0..200).map(|_| env.next()).fold(0.0_f32, f32::max);
        assert!((peak_level - 1.0).abs() < 1e-6);
        // Holds at sustain until the gate closes.
        for _ in 0..2000 {
            env.next();
        }
        assert!((env.level - profile.sustain).abs() < 1e-6);
        env.gate_off();
        for _ in 0..(profile.release * RATE) as usize + 2 {
            env.next();
        }
        assert!(env.is_idle());
    }
}
