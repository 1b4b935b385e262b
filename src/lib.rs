/// Bottlebeat - a multi-voice step sequencer core
///
/// Up to seven bottles, each with a material-driven voice and a fill level
/// that picks its pitch, play on a shared sixteen-step loop:
/// - Pitch mapping from fill level and scale
/// - Per-material voices behind a factory trait, with a cpal backend
/// - A tempo-gliding transport that schedules ahead of the audio clock
/// - The sequencer engine tying instruments, transport and voices together

pub mod audio;
pub mod config;
pub mod error;
pub mod pitch;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioClock, AudioOutput, AudioVoiceFactory, Material};
pub use config::SequencerConfig;
pub use error::{Error, Result, VoiceError};
pub use pitch::{fill_to_frequency, midi_note_name, note_for_fill, Scale};
pub use sequencer::{
    Clock, Instrument, InstrumentId, ManualClock, Pattern, Position, RunState, SequencerEngine,
    SequencerEvent, SequencerState, Transport,
};
