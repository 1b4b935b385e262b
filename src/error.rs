/// Error types for the audio backend
///
/// The sequencer core itself never fails: bad input is clamped, capacity is
/// a no-op and voice faults are logged per instrument. Only opening the audio
/// device can return an [`Error`].
use thiserror::Error;

use crate::audio::VoiceKey;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported sample format {0:?}, only f32 output is supported")]
    UnsupportedSampleFormat(cpal::SampleFormat),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single voice failed to schedule a note.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    #[error("voice {0:?} was already disposed")]
    Disposed(VoiceKey),

    #[error("audio output closed")]
    OutputClosed,

    #[error("invalid frequency {0} Hz for a pitched voice")]
    InvalidFrequency(f32),
}
