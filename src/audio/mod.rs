/// Audio output using cpal
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sequencer::Clock;

mod synth;
pub mod voice;

use synth::{RenderCommand, Renderer};
use voice::VoiceTable;
pub use voice::{
    trigger, AudioVoice, AudioVoiceFactory, Material, ScheduledNote, Timbre, Voice, VoiceFactory,
    VoiceKey, VoiceProfile, TRIGGER_VELOCITY,
};

/// Seconds of audio rendered so far by the output stream.
///
/// This is the clock notes are scheduled against, so a note scheduled for
/// time `t` starts at frame `t * sample_rate`.
#[derive(Debug, Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl Clock for AudioClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate
    }
}

/// The default output device, rendering every voice created through
/// [`AudioOutput::voice_factory`].
pub struct AudioOutput {
    _stream: cpal::Stream,
    commands: Sender<RenderCommand>,
    voices: Rc<RefCell<VoiceTable>>,
    clock: AudioClock,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(Error::NoOutputDevice)?;
        let config = device.default_output_config()?;

        let sample_format = config.sample_format();
        if sample_format != cpal::SampleFormat::F32 {
            return Err(Error::UnsupportedSampleFormat(sample_format));
        }

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let (commands, receiver) = channel();
        let frames = Arc::new(AtomicU64::new(0));
        let mut renderer = Renderer::new(sample_rate as f32, receiver, Arc::clone(&frames));
        let mut mono = Vec::new();

        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frame_count = data.len() / channels;
                mono.resize(frame_count, 0.0);
                renderer.process(&mut mono);
                for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(*sample);
                }
            },
            |err| warn!("audio stream error: {}", err),
            None,
        )?;
        stream.play()?;

        debug!(sample_rate, channels, "audio output started");

        Ok(Self {
            _stream: stream,
            commands,
            voices: Rc::new(RefCell::new(VoiceTable::with_key())),
            clock: AudioClock {
                frames,
                sample_rate: sample_rate as f64,
            },
        })
    }

    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }

    pub fn voice_factory(&self) -> AudioVoiceFactory {
        AudioVoiceFactory {
            commands: self.commands.clone(),
            voices: Rc::clone(&self.voices),
        }
    }
}
