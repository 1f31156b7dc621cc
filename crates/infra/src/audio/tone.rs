//! Synthetic event collaborator: sine tones from a TOML bank
//!
//! [`ToneBank`] is the control-side [`EventRegistry`], [`ToneSource`] the
//! mixer-side [`SignalSource`]. They share a fixed pool of voices whose play
//! state, pitch and level are [`Shared`] cells, so starting or stopping a tone
//! never blocks the audio thread.
//!
//! Bank format:
//!
//! ```toml
//! [[events]]
//! id = "beep"
//! frequency_hz = 440.0
//! amplitude = 0.5
//! ```

use minstrel_core::domain::registry::Result;
use minstrel_core::domain::{
    AudioBuffer, BankHandle, EventHandle, EventRegistry, RegistryError, Shared, SignalSource,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::f32::consts::TAU;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Voices available to all loaded banks together
pub const MAX_TONES: usize = 64;

#[derive(Debug, Clone, Deserialize)]
struct BankFile {
    #[serde(default)]
    events: Vec<ToneSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToneSpec {
    id: String,
    frequency_hz: f32,
    #[serde(default = "default_amplitude")]
    amplitude: f32,
}

fn default_amplitude() -> f32 {
    0.5
}

#[derive(Debug, Default)]
struct Voice {
    playing: Shared<bool>,
    handle: Shared<u32>,
    frequency: Shared<f32>,
    amplitude: Shared<f32>,
}

#[derive(Debug)]
struct Voices {
    events: Vec<Voice>,
    input: Voice,
}

#[derive(Debug)]
struct ToneSlot {
    id: String,
    bank: BankHandle,
}

/// Control-side tone registry
#[derive(Debug)]
pub struct ToneBank {
    voices: Arc<Voices>,
    slots: Vec<Option<ToneSlot>>,
    generations: Vec<u16>,
    ids: HashMap<String, EventHandle>,
    banks: HashSet<BankHandle>,
    next_bank: u32,
    nyquist: f32,
}

/// Mixer-side tone renderer
pub struct ToneSource {
    voices: Arc<Voices>,
    phases: Vec<f32>,
    input_phase: f32,
    sample_rate: f32,
}

/// Control of the synthetic input stream
#[derive(Debug, Clone)]
pub struct ToneInput {
    voices: Arc<Voices>,
}

impl ToneBank {
    /// Create a bank and the source rendering its tones at `sample_rate`
    pub fn new(sample_rate: u32) -> (Self, ToneSource) {
        let voices = Arc::new(Voices {
            events: (0..MAX_TONES).map(|_| Voice::default()).collect(),
            input: Voice::default(),
        });

        let bank = Self {
            voices: Arc::clone(&voices),
            slots: (0..MAX_TONES).map(|_| None).collect(),
            generations: vec![0; MAX_TONES],
            ids: HashMap::new(),
            banks: HashSet::new(),
            next_bank: 0,
            nyquist: sample_rate as f32 / 2.0,
        };
        let source = ToneSource {
            voices,
            phases: vec![0.0; MAX_TONES],
            input_phase: 0.0,
            sample_rate: sample_rate as f32,
        };
        (bank, source)
    }

    pub fn input(&self) -> ToneInput {
        ToneInput {
            voices: Arc::clone(&self.voices),
        }
    }

    /// Load a bank from TOML text
    pub fn load_bank_str(&mut self, contents: &str) -> Result<BankHandle> {
        let file: BankFile = toml::from_str(contents)?;
        self.validate(&file)?;

        let free: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .take(file.events.len())
            .collect();
        if free.len() < file.events.len() {
            return Err(RegistryError::InvalidBank(format!(
                "tone pool exhausted ({MAX_TONES} voices)"
            )));
        }

        let bank = BankHandle::new(self.next_bank);
        self.next_bank += 1;

        for (index, spec) in free.iter().copied().zip(file.events) {
            let handle = Self::handle(index, self.generations[index]);
            let voice = &self.voices.events[index];
            voice.handle.store(handle.raw());
            voice.frequency.store(spec.frequency_hz);
            voice.amplitude.store(spec.amplitude);

            debug!("Tone '{}' -> {}", spec.id, handle);
            self.ids.insert(spec.id.clone(), handle);
            self.slots[index] = Some(ToneSlot { id: spec.id, bank });
        }

        self.banks.insert(bank);
        Ok(bank)
    }

    fn validate(&self, file: &BankFile) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in &file.events {
            if !seen.insert(spec.id.as_str()) || self.ids.contains_key(&spec.id) {
                return Err(RegistryError::InvalidBank(format!(
                    "duplicate event id '{}'",
                    spec.id
                )));
            }
            if !(spec.frequency_hz > 0.0 && spec.frequency_hz < self.nyquist) {
                return Err(RegistryError::InvalidBank(format!(
                    "event '{}': frequency {} Hz out of range",
                    spec.id, spec.frequency_hz
                )));
            }
            if !(0.0..=1.0).contains(&spec.amplitude) {
                return Err(RegistryError::InvalidBank(format!(
                    "event '{}': amplitude {} out of range",
                    spec.id, spec.amplitude
                )));
            }
        }
        Ok(())
    }

    fn handle(index: usize, generation: u16) -> EventHandle {
        EventHandle::new((u32::from(generation) << 16) | index as u32)
    }

    fn slot_index(&self, event: EventHandle) -> Option<usize> {
        let index = (event.raw() & 0xffff) as usize;
        let generation = (event.raw() >> 16) as u16;

        match self.slots.get(index) {
            Some(Some(_)) if self.generations[index] == generation => Some(index),
            _ => None,
        }
    }
}

impl EventRegistry for ToneBank {
    fn load_bank(&mut self, path: &Path) -> Result<BankHandle> {
        let contents = std::fs::read_to_string(path)?;
        self.load_bank_str(&contents)
    }

    fn unload_bank(&mut self, bank: BankHandle) -> Result<()> {
        if !self.banks.remove(&bank) {
            return Err(RegistryError::BankNotLoaded(bank));
        }

        for (index, entry) in self.slots.iter_mut().enumerate() {
            if !entry.as_ref().is_some_and(|slot| slot.bank == bank) {
                continue;
            }
            self.voices.events[index].playing.store(false);
            if let Some(slot) = entry.take() {
                self.ids.remove(&slot.id);
            }
            self.generations[index] = self.generations[index].wrapping_add(1);
        }
        debug!("Unloaded tone bank {}", bank);
        Ok(())
    }

    fn event_handle(&self, id: &str) -> Result<EventHandle> {
        self.ids
            .get(id)
            .copied()
            .ok_or_else(|| RegistryError::EventNotFound(id.to_string()))
    }

    fn is_valid(&self, event: EventHandle) -> bool {
        self.slot_index(event).is_some()
    }

    fn start(&mut self, event: EventHandle) -> Result<()> {
        let index = self
            .slot_index(event)
            .ok_or(RegistryError::InvalidEvent(event))?;
        self.voices.events[index].playing.store(true);
        Ok(())
    }

    fn stop(&mut self, event: EventHandle) -> Result<()> {
        let index = self
            .slot_index(event)
            .ok_or(RegistryError::InvalidEvent(event))?;
        self.voices.events[index].playing.store(false);
        Ok(())
    }
}

impl ToneInput {
    /// Feed a sine of `frequency_hz` at `level` into the input stream
    pub fn set(&self, frequency_hz: f32, level: f32) {
        let input = &self.voices.input;
        input.frequency.store(frequency_hz);
        input.amplitude.store(level.clamp(0.0, 1.0));
        input.playing.store(true);
    }

    pub fn set_level(&self, level: f32) {
        self.voices.input.amplitude.store(level.clamp(0.0, 1.0));
    }

    pub fn off(&self) {
        self.voices.input.playing.store(false);
    }
}

/// Fill every channel with a sine, returning the advanced phase
#[inline]
fn render_sine(buffer: &mut AudioBuffer<'_>, phase: f32, increment: f32, amplitude: f32) -> f32 {
    let channels = buffer.channels();
    if channels == 0 {
        return phase;
    }
    let mut phase = phase;

    for frame in buffer.samples_mut().chunks_exact_mut(channels) {
        let sample = amplitude * (TAU * phase).sin();
        frame.fill(sample);
        phase = (phase + increment).fract();
    }
    phase
}

impl SignalSource for ToneSource {
    fn render_events(
        &mut self,
        scratch: &mut AudioBuffer<'_>,
        sink: &mut dyn FnMut(EventHandle, &mut AudioBuffer<'_>),
    ) {
        for (voice, phase) in self.voices.events.iter().zip(self.phases.iter_mut()) {
            if !voice.playing.load() {
                continue;
            }

            let increment = voice.frequency.load() / self.sample_rate;
            *phase = render_sine(scratch, *phase, increment, voice.amplitude.load());
            sink(EventHandle::new(voice.handle.load()), scratch);
        }
    }

    fn capture_input(&mut self, buffer: &mut AudioBuffer<'_>) -> bool {
        let input = &self.voices.input;
        if !input.playing.load() {
            return false;
        }

        let increment = input.frequency.load() / self.sample_rate;
        self.input_phase = render_sine(buffer, self.input_phase, increment, input.amplitude.load());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANK: &str = r#"
        [[events]]
        id = "low"
        frequency_hz = 110.0
        amplitude = 0.5

        [[events]]
        id = "high"
        frequency_hz = 880.0
    "#;

    fn render(source: &mut ToneSource) -> Vec<(EventHandle, f32)> {
        let mut data = vec![0.0; 512];
        let mut scratch = AudioBuffer::new(&mut data, 2);
        let mut rendered = Vec::new();
        source.render_events(&mut scratch, &mut |event: EventHandle, buffer: &mut AudioBuffer<'_>| {
            let peak = buffer.samples().iter().fold(0.0_f32, |m, s| m.max(s.abs()));
            rendered.push((event, peak));
        });
        rendered
    }

    #[test]
    fn test_load_and_resolve() {
        let (mut bank, _) = ToneBank::new(44_100);
        bank.load_bank_str(BANK).unwrap();

        let low = bank.event_handle("low").unwrap();
        let high = bank.event_handle("high").unwrap();
        assert_ne!(low, high);
        assert!(bank.is_valid(low));
        assert!(matches!(
            bank.event_handle("missing"),
            Err(RegistryError::EventNotFound(_))
        ));
    }

    #[test]
    fn test_only_started_events_render() {
        let (mut bank, mut source) = ToneBank::new(44_100);
        bank.load_bank_str(BANK).unwrap();
        let low = bank.event_handle("low").unwrap();

        assert!(render(&mut source).is_empty());

        bank.start(low).unwrap();
        let rendered = render(&mut source);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].0, low);
        assert!(rendered[0].1 > 0.4 && rendered[0].1 <= 0.5);

        bank.stop(low).unwrap();
        assert!(render(&mut source).is_empty());
    }

    #[test]
    fn test_unload_invalidates_handles() {
        let (mut bank, mut source) = ToneBank::new(44_100);
        let handle = bank.load_bank_str(BANK).unwrap();
        let low = bank.event_handle("low").unwrap();
        bank.start(low).unwrap();

        bank.unload_bank(handle).unwrap();
        assert!(!bank.is_valid(low));
        assert!(render(&mut source).is_empty());
        assert!(matches!(
            bank.unload_bank(handle),
            Err(RegistryError::BankNotLoaded(_))
        ));

        // The reloaded tone gets the same slot with a new generation
        bank.load_bank_str(BANK).unwrap();
        let reloaded = bank.event_handle("low").unwrap();
        assert_ne!(reloaded, low);
        assert!(!bank.is_valid(low));
    }

    #[test]
    fn test_unload_keeps_other_banks() {
        let (mut bank, mut source) = ToneBank::new(44_100);
        let first = bank.load_bank_str(BANK).unwrap();
        bank.load_bank_str("[[events]]\nid = \"other\"\nfrequency_hz = 220.0\n")
            .unwrap();
        let other = bank.event_handle("other").unwrap();
        bank.start(other).unwrap();

        bank.unload_bank(first).unwrap();

        assert!(bank.is_valid(other));
        assert!(bank.event_handle("low").is_err());
        let rendered = render(&mut source);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].0, other);
    }

    #[test]
    fn test_rejects_bad_banks() {
        let (mut bank, _) = ToneBank::new(44_100);

        let duplicate = "[[events]]\nid = \"a\"\nfrequency_hz = 100.0\n[[events]]\nid = \"a\"\nfrequency_hz = 200.0\n";
        assert!(matches!(
            bank.load_bank_str(duplicate),
            Err(RegistryError::InvalidBank(_))
        ));

        let too_high = "[[events]]\nid = \"a\"\nfrequency_hz = 30000.0\n";
        assert!(matches!(
            bank.load_bank_str(too_high),
            Err(RegistryError::InvalidBank(_))
        ));

        assert!(matches!(
            bank.load_bank_str("events = 3"),
            Err(RegistryError::Parse(_))
        ));
    }

    #[test]
    fn test_input_tone() {
        let (bank, mut source) = ToneBank::new(48_000);
        let input = bank.input();
        let mut data = vec![0.0; 256];

        assert!(!source.capture_input(&mut AudioBuffer::new(&mut data, 1)));

        input.set(1_000.0, 0.25);
        assert!(source.capture_input(&mut AudioBuffer::new(&mut data, 1)));
        let peak = data.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.25).abs() < 1e-3);

        input.off();
        assert!(!source.capture_input(&mut AudioBuffer::new(&mut data, 1)));
    }
}
