/// Materials, their voice profiles, and the trigger contract
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::Sender;

use slotmap::SlotMap;
use tracing::debug;

use super::synth::RenderCommand;
use crate::error::VoiceError;

/// Gain every trigger plays at.
pub const TRIGGER_VELOCITY: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Material {
    Water,
    Rice,
    Beads,
    Sand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timbre {
    /// Amplitude-modulated sine.
    Tonal,
    /// Karplus-Strong string.
    Pluck,
    WhiteNoise,
    BrownNoise,
}

/// Envelope and trigger behavior of one material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceProfile {
    pub timbre: Timbre,
    /// Whether the trigger frequency is used at all.
    pub pitched: bool,
    /// Gate length in seconds.
    pub duration: f64,
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

const PROFILES: [VoiceProfile; 4] = [
    // water
    VoiceProfile {
        timbre: Timbre::Tonal,
        pitched: true,
        duration: 0.25,
        attack: 0.01,
        decay: 0.1,
        sustain: 0.6,
        release: 0.3,
    },
    // rice
    VoiceProfile {
        timbre: Timbre::WhiteNoise,
        pitched: false,
        duration: 0.03,
        attack: 0.001,
        decay: 0.08,
        sustain: 0.0,
        release: 0.02,
    },
    // beads
    VoiceProfile {
        timbre: Timbre::Pluck,
        pitched: true,
        duration: 0.2,
        attack: 0.001,
        decay: 0.0,
        sustain: 1.0,
        release: 1.0,
    },
    // sand
    VoiceProfile {
        timbre: Timbre::BrownNoise,
        pitched: false,
        duration: 0.06,
        attack: 0.001,
        decay: 0.06,
        sustain: 0.0,
        release: 0.02,
    },
];

impl Material {
    pub const ALL: [Material; 4] = [Material::Water, Material::Rice, Material::Beads, Material::Sand];

    pub fn profile(self) -> &'static VoiceProfile {
        &PROFILES[self as usize]
    }

    pub fn is_pitched(self) -> bool {
        self.profile().pitched
    }

    pub fn name(self) -> &'static str {
        match self {
            Material::Water => "water",
            Material::Rice => "rice",
            Material::Beads => "beads",
            Material::Sand => "sand",
        }
    }

    pub fn from_name(name: &str) -> Option<Material> {
        Material::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A note event at an absolute clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledNote {
    /// `None` for unpitched materials.
    pub frequency: Option<f32>,
    pub at: f64,
    pub duration: f64,
    pub velocity: f32,
}

/// An audio-producing resource owned by exactly one instrument.
pub trait Voice {
    /// Queue a note. Must not block.
    fn schedule(&mut self, note: ScheduledNote) -> Result<(), VoiceError>;

    /// Release the underlying resources. Calling it again is a no-op.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

pub trait VoiceFactory {
    fn create_voice(&mut self, material: Material) -> Box<dyn Voice>;
}

/// Schedule one sound for `material` on `voice` at `at`.
///
/// Unpitched materials ignore `frequency`; pitched ones need it finite and
/// positive.
pub fn trigger(
    voice: &mut dyn Voice,
    material: Material,
    frequency: f32,
    at: f64,
) -> Result<(), VoiceError> {
    let profile = material.profile();
    let frequency = if profile.pitched {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(VoiceError::InvalidFrequency(frequency));
        }
        Some(frequency)
    } else {
        None
    };

    voice.schedule(ScheduledNote {
        frequency,
        at,
        duration: profile.duration,
        velocity: TRIGGER_VELOCITY,
    })
}

slotmap::new_key_type! {
    /// Identifies one voice on the renderer. A key goes stale once its voice
    /// is released, even if the slot is later reused.
    pub struct VoiceKey;
}

/// Keys handed out by one output, with the material each was created for.
pub(crate) type VoiceTable = SlotMap<VoiceKey, Material>;

/// Voice backed by the cpal renderer.
pub struct AudioVoice {
    key: VoiceKey,
    material: Material,
    commands: Sender<RenderCommand>,
    voices: Rc<RefCell<VoiceTable>>,
    disposed: bool,
}

impl Voice for AudioVoice {
    fn schedule(&mut self, note: ScheduledNote) -> Result<(), VoiceError> {
        if self.disposed {
            return Err(VoiceError::Disposed(self.key));
        }
        self.commands
            .send(RenderCommand::Play { key: self.key, note })
            .map_err(|_| VoiceError::OutputClosed)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.voices.borrow_mut().remove(self.key);
        // The stream may already be gone; nothing left to free then.
        let _ = self.commands.send(RenderCommand::Release { key: self.key });
        debug!(key = ?self.key, material = %self.material, "voice disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for AudioVoice {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Creates [`AudioVoice`]s that play through one [`super::AudioOutput`].
#[derive(Clone)]
pub struct AudioVoiceFactory {
    pub(crate) commands: Sender<RenderCommand>,
    pub(crate) voices: Rc<RefCell<VoiceTable>>,
}

impl VoiceFactory for AudioVoiceFactory {
    fn create_voice(&mut self, material: Material) -> Box<dyn Voice> {
        let key = self.voices.borrow_mut().insert(material);
        let _ = self.commands.send(RenderCommand::Create { key, material });
        debug!(key = ?key, material = %material, "voice created");
        Box::new(AudioVoice {
            key,
            material,
            commands: self.commands.clone(),
            voices: Rc::clone(&self.voices),
            disposed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{channel, Receiver};

    fn factory() -> (AudioVoiceFactory, Receiver<RenderCommand>) {
        let (commands, receiver) = channel();
        let factory = AudioVoiceFactory {
            commands,
            voices: Rc::new(RefCell::new(VoiceTable::with_key())),
        };
        (factory, receiver)
    }

    #[test]
    fn test_profile_lookup() {
        assert!(Material::Water.is_pitched());
        assert!(Material::Beads.is_pitched());
        assert!(!Material::Rice.is_pitched());
        assert!(!Material::Sand.is_pitched());
        assert_eq!(Material::Rice.profile().duration, 0.03);
        assert_eq!(Material::Sand.profile().timbre, Timbre::BrownNoise);
        assert_eq!(Material::from_name("Beads"), Some(Material::Beads));
        assert_eq!(Material::from_name("glass"), None);
    }

    #[test]
    fn test_disposed_key_leaves_table() {
        let (mut factory, receiver) = factory();
        let first = factory.create_voice(Material::Water);
        let second = factory.create_voice(Material::Sand);
        assert_eq!(factory.voices.borrow().len(), 2);

        drop(first);
        assert_eq!(factory.voices.borrow().len(), 1);
        let keys: Vec<VoiceKey> = receiver
            .try_iter()
            .filter_map(|c| match c {
                RenderCommand::Create { key, .. } => Some(key),
                _ => None,
            })
            .collect();
        assert!(!factory.voices.borrow().contains_key(keys[0]));
        assert_eq!(factory.voices.borrow().get(keys[1]), Some(&Material::Sand));

        // A reused slot gets a fresh key.
        let _third = factory.create_voice(Material::Rice);
        let reused = receiver
            .try_iter()
            .find_map(|c| match c {
                RenderCommand::Create { key, .. } => Some(key),
                _ => None,
            })
            .unwrap();
        assert_ne!(reused, keys[0]);
        drop(second);
    }

    #[test]
    fn test_trigger_sends_play() {
        let (mut factory, receiver) = factory();
        let mut voice = factory.create_voice(Material::Water);
        trigger(voice.as_mut(), Material::Water, 440.0, 1.5).unwrap();

        let commands: Vec<_> = receiver.try_iter().collect();
        assert_eq!(commands.len(), 2);
        match commands[1] {
            RenderCommand::Play { note, .. } => {
                assert_eq!(note.frequency, Some(440.0));
                assert_eq!(note.at, 1.5);
                assert_eq!(note.duration, 0.25);
                assert_eq!(note.velocity, TRIGGER_VELOCITY);
            }
            ref other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_noise_ignores_frequency() {
        let (mut factory, receiver) = factory();
        let mut voice = factory.create_voice(Material::Rice);
        trigger(voice.as_mut(), Material::Rice, f32::NAN, 0.0).unwrap();
        let played = receiver
            .try_iter()
            .find_map(|c| match c {
                RenderCommand::Play { note, .. } => Some(note),
                _ => None,
            })
            .unwrap();
        assert_eq!(played.frequency, None);
    }

    #[test]
    fn test_pitched_rejects_bad_frequency() {
        let (mut factory, _receiver) = factory();
        let mut voice = factory.create_voice(Material::Beads);
        assert_eq!(
            trigger(voice.as_mut(), Material::Beads, 0.0, 0.0),
            Err(VoiceError::InvalidFrequency(0.0))
        );
    }

    #[test]
    fn test_dispose_once() {
        let (mut factory, receiver) = factory();
        let mut voice = factory.create_voice(Material::Sand);
        voice.dispose();
        voice.dispose();
        drop(voice);

        let releases = receiver
            .try_iter()
            .filter(|c| matches!(c, RenderCommand::Release { .. }))
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn test_disposed_voice_rejects_trigger() {
        let (mut factory, _receiver) = factory();
        let mut voice = factory.create_voice(Material::Water);
        voice.dispose();
        assert!(matches!(
            trigger(voice.as_mut(), Material::Water, 440.0, 0.0),
            Err(VoiceError::Disposed(_))
        ));
    }

    #[test]
    fn test_closed_output() {
        let (mut factory, receiver) = factory();
        let mut voice = factory.create_voice(Material::Water);
        drop(receiver);
        assert_eq!(
            trigger(voice.as_mut(), Material::Water, 440.0, 0.0),
            Err(VoiceError::OutputClosed)
        );
    }
}
