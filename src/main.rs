#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use bottlebeat::{
    midi_note_name, note_for_fill, AudioClock, AudioOutput, AudioVoiceFactory, Clock,
    InstrumentId, Material, Scale, SequencerConfig, SequencerEngine, SequencerEvent,
};

#[cfg(feature = "gui")]
use std::collections::VecDeque;

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt::init();

    let output = AudioOutput::new().unwrap_or_else(|e| {
        eprintln!("Failed to open audio output: {}", e);
        std::process::exit(1);
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 700.0])
            .with_title("Bottlebeat"),
        ..Default::default()
    };

    eframe::run_native(
        "Bottlebeat",
        options,
        Box::new(|_cc| Ok(Box::new(BottleApp::new(output)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
enum Action {
    SetMaterial(InstrumentId, Material),
    SetFill(InstrumentId, f32),
    ToggleStep(InstrumentId, usize),
    Audition(InstrumentId),
    SeedPattern(InstrumentId),
    ClearPattern(InstrumentId),
    Remove(InstrumentId),
}

#[cfg(feature = "gui")]
struct BottleApp {
    engine: SequencerEngine<AudioVoiceFactory, AudioClock>,
    _output: AudioOutput,

    // UI state
    scheduled_events: VecDeque<SequencerEvent>,
    current_visual_step: Option<usize>,
    beat_lit_until: f64,
}

#[cfg(feature = "gui")]
impl BottleApp {
    fn new(output: AudioOutput) -> Self {
        let mut engine = SequencerEngine::new(
            SequencerConfig::default(),
            output.voice_factory(),
            output.clock(),
        );
        engine.seed_scene();

        Self {
            engine,
            _output: output,
            scheduled_events: VecDeque::new(),
            current_visual_step: None,
            beat_lit_until: 0.0,
        }
    }

    /// Events arrive up to a lookahead early; show them when their time comes.
    fn handle_playback_events(&mut self) {
        self.engine.process();
        self.scheduled_events.extend(self.engine.poll_events());

        let now = self.engine.clock().now();
        while let Some(event) = self.scheduled_events.front().copied() {
            match event {
                SequencerEvent::StepAdvanced { step, time } if time <= now => {
                    self.current_visual_step = Some(step);
                }
                SequencerEvent::Beat { time, .. } if time <= now => {
                    self.beat_lit_until = time + 0.1;
                }
                _ => break,
            }
            self.scheduled_events.pop_front();
        }
    }

    fn enable_sound(&mut self) {
        self.engine.unlock_audio();
    }

    fn toggle_playback(&mut self) {
        if !self.engine.is_audio_unlocked() {
            self.enable_sound();
        }
        self.engine.toggle_play();
        if !self.engine.is_playing() {
            self.scheduled_events.clear();
            self.current_visual_step = None;
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::SetMaterial(id, material) => {
                self.engine.set_material(id, material);
            }
            Action::SetFill(id, fill) => {
                self.engine.set_fill(id, fill);
            }
            Action::ToggleStep(id, step) => {
                self.engine.toggle_pattern_step(id, step);
            }
            Action::Audition(id) => {
                self.engine.audition_instrument(id);
            }
            Action::SeedPattern(id) => {
                self.engine.seed_pattern(id);
            }
            Action::ClearPattern(id) => {
                self.engine.clear_pattern(id);
            }
            Action::Remove(id) => {
                self.engine.remove_instrument(id);
            }
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for BottleApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_playback_events();

        let mut actions = Vec::new();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Bottlebeat");
            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                let unlocked = self.engine.is_audio_unlocked();
                let label = if unlocked { "Sound Ready" } else { "Enable Sound" };
                if ui.add_enabled(!unlocked, egui::Button::new(label)).clicked() {
                    self.enable_sound();
                }

                let play_label = if self.engine.is_playing() { "⏸ Stop" } else { "▶ Play" };
                if ui.button(play_label).clicked() {
                    self.toggle_playback();
                }

                ui.add_space(20.0);

                ui.label("BPM:");
                let mut bpm = self.engine.state().bpm();
                if ui
                    .add(egui::Slider::new(&mut bpm, 40.0..=240.0).step_by(1.0))
                    .changed()
                {
                    self.engine.set_tempo(bpm);
                }

                ui.add_space(20.0);

                let mut scale = self.engine.state().scale();
                egui::ComboBox::from_label("Scale")
                    .selected_text(scale.name())
                    .show_ui(ui, |ui| {
                        for option in Scale::ALL {
                            ui.selectable_value(&mut scale, option, option.name());
                        }
                    });
                if scale != self.engine.state().scale() {
                    self.engine.set_scale(scale);
                }

                let beat_on = self.engine.clock().now() < self.beat_lit_until;
                let color = if beat_on {
                    egui::Color32::from_rgb(100, 200, 100)
                } else {
                    egui::Color32::from_rgb(40, 40, 40)
                };
                ui.colored_label(color, "●");
            });

            ui.add_space(10.0);

            ui.horizontal(|ui| {
                let max = self.engine.config().max_instruments;
                if ui
                    .add_enabled(!self.engine.is_full(), egui::Button::new("+ Add bottle"))
                    .clicked()
                {
                    self.engine.add_random_instrument(&mut rand::thread_rng());
                }
                ui.label(format!("{} / {}", self.engine.instrument_count(), max));
            });

            ui.separator();

            let step_count = self.engine.state().step_count();
            let scale = self.engine.state().scale();
            for instrument in self.engine.instruments() {
                let id = instrument.id();
                ui.horizontal(|ui| {
                    let fill = (instrument.fill() * 100.0).round();
                    if instrument.material().is_pitched() {
                        let note = midi_note_name(note_for_fill(instrument.fill(), scale));
                        ui.label(format!("{} • {}% • {}", id, fill, note));
                    } else {
                        ui.label(format!("{} • {}%", id, fill));
                    }

                    let mut material = instrument.material();
                    egui::ComboBox::from_id_source(("material", id.value()))
                        .selected_text(material.name())
                        .show_ui(ui, |ui| {
                            for option in Material::ALL {
                                ui.selectable_value(&mut material, option, option.name());
                            }
                        });
                    if material != instrument.material() {
                        actions.push(Action::SetMaterial(id, material));
                    }

                    let mut fill = instrument.fill();
                    if ui.add(egui::Slider::new(&mut fill, 0.0..=1.0)).changed() {
                        actions.push(Action::SetFill(id, fill));
                    }

                    if ui.button("♪").clicked() {
                        actions.push(Action::Audition(id));
                    }
                    if ui.button("Seed").clicked() {
                        actions.push(Action::SeedPattern(id));
                    }
                    if ui.button("Clear").clicked() {
                        actions.push(Action::ClearPattern(id));
                    }
                    if ui.button("Remove").clicked() {
                        actions.push(Action::Remove(id));
                    }
                });

                ui.horizontal(|ui| {
                    for step in 0..step_count {
                        let is_current = self.current_visual_step == Some(step);
                        let step_enabled = instrument.pattern().get(step);

                        let button = egui::Button::new("")
                            .min_size(egui::vec2(28.0, 28.0))
                            .fill(if is_current {
                                egui::Color32::from_rgb(100, 200, 100)
                            } else if step_enabled {
                                egui::Color32::from_rgb(60, 60, 200)
                            } else {
                                egui::Color32::from_rgb(40, 40, 40)
                            });

                        if ui.add(button).clicked() {
                            actions.push(Action::ToggleStep(id, step));
                        }
                    }
                });

                ui.add_space(8.0);
            }

            ui.separator();
            ui.label("Click steps to enable/disable them, ♪ to audition a bottle");
            if !self.engine.is_audio_unlocked() {
                ui.colored_label(egui::Color32::YELLOW, "⚠ Sound is off until enabled");
            }
        });

        for action in actions {
            self.apply(action);
        }
    }
}
