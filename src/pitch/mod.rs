/// Fill-to-pitch mapping
///
/// A scale is a tonic plus semitone offsets within one octave. The playable
/// pool is that degree set repeated over three octaves above the tonic, and a
/// fill level in [0, 1] picks one entry from it.
use std::fmt;

/// Octave offsets (above the tonic) the note pool is built from.
const POOL_OCTAVES: [u8; 3] = [1, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scale {
    #[default]
    Pentatonic,
    Minor,
    WholeTone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleDefinition {
    pub tonic: u8,
    pub degrees: &'static [u8],
}

impl Scale {
    pub const ALL: [Scale; 3] = [Scale::Pentatonic, Scale::Minor, Scale::WholeTone];

    pub fn definition(self) -> ScaleDefinition {
        match self {
            Scale::Pentatonic => ScaleDefinition {
                tonic: 60,
                degrees: &[0, 2, 4, 7, 9],
            },
            Scale::Minor => ScaleDefinition {
                tonic: 57,
                degrees: &[0, 2, 3, 5, 7, 8, 10],
            },
            Scale::WholeTone => ScaleDefinition {
                tonic: 60,
                degrees: &[0, 2, 4, 6, 8, 10],
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Scale::Pentatonic => "pentatonic",
            Scale::Minor => "minor",
            Scale::WholeTone => "whole",
        }
    }

    /// Unknown names fall back to the default scale.
    pub fn from_name(name: &str) -> Scale {
        Scale::ALL
            .into_iter()
            .find(|scale| scale.name().eq_ignore_ascii_case(name.trim()))
            .unwrap_or_default()
    }

    /// Ascending MIDI notes playable in this scale.
    pub fn note_pool(self) -> Vec<u8> {
        let def = self.definition();
        POOL_OCTAVES
            .iter()
            .flat_map(|octave| {
                def.degrees
                    .iter()
                    .map(move |degree| def.tonic + degree + 12 * octave)
            })
            .collect()
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Clamp to [0, 1]. NaN reads as empty.
pub fn clamp_fill(fill: f32) -> f32 {
    if fill.is_nan() {
        0.0
    } else {
        fill.clamp(0.0, 1.0)
    }
}

/// Quantize a fill level to a note from the scale's pool.
pub fn note_for_fill(fill: f32, scale: Scale) -> u8 {
    let pool = scale.note_pool();
    let index = (clamp_fill(fill) * (pool.len() - 1) as f32).round() as usize;
    pool[index.min(pool.len() - 1)]
}

pub fn fill_to_frequency(fill: f32, scale: Scale) -> f32 {
    midi_to_frequency(note_for_fill(fill, scale))
}

/// Equal temperament, A4 (note 69) = 440 Hz.
pub fn midi_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pentatonic_pool() {
        let pool = Scale::Pentatonic.note_pool();
        assert_eq!(pool.len(), 15);
        assert_eq!(pool[0], 72);
        assert_eq!(pool[14], 105);
        assert!(pool.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_pool_sizes() {
        assert_eq!(Scale::Minor.note_pool().len(), 21);
        assert_eq!(Scale::WholeTone.note_pool().len(), 18);
        assert_eq!(Scale::Minor.note_pool()[0], 69);
    }

    #[test]
    fn test_fill_endpoints_and_middle() {
        assert_eq!(note_for_fill(0.0, Scale::Pentatonic), 72);
        assert_eq!(note_for_fill(1.0, Scale::Pentatonic), 105);
        // round(0.5 * 14) = 7
        assert_eq!(note_for_fill(0.5, Scale::Pentatonic), 88);
    }

    #[test]
    fn test_out_of_range_fill_is_clamped() {
        for scale in Scale::ALL {
            assert_eq!(fill_to_frequency(-1.0, scale), fill_to_frequency(0.0, scale));
            assert_eq!(fill_to_frequency(2.0, scale), fill_to_frequency(1.0, scale));
        }
        assert_eq!(note_for_fill(f32::NAN, Scale::Pentatonic), 72);
    }

    #[test]
    fn test_monotonic_and_deterministic() {
        for scale in Scale::ALL {
            let mut last = 0.0;
            for i in 0..=100 {
                let fill = i as f32 / 100.0;
                let freq = fill_to_frequency(fill, scale);
                assert_eq!(freq, fill_to_frequency(fill, scale));
                assert!(freq >= last);
                assert!(freq > 0.0);
                last = freq;
            }
        }
    }

    #[test]
    fn test_unknown_scale_falls_back() {
        assert_eq!(Scale::from_name("lydian"), Scale::Pentatonic);
        assert_eq!(Scale::from_name("Minor"), Scale::Minor);
        assert_eq!(Scale::from_name("whole"), Scale::WholeTone);
        assert_eq!(
            fill_to_frequency(0.3, Scale::from_name("does-not-exist")),
            fill_to_frequency(0.3, Scale::Pentatonic)
        );
    }

    #[test]
    fn test_midi_to_frequency() {
        assert_relative_eq!(midi_to_frequency(69), 440.0);
        assert_relative_eq!(midi_to_frequency(81), 880.0, epsilon = 1e-3);
        assert_relative_eq!(midi_to_frequency(60), 261.6256, epsilon = 1e-3);
    }

    #[test]
    fn test_note_names() {
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(70), "A#4");
        assert_eq!(midi_note_name(57), "A3");
    }
}
