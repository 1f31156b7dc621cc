//! Real-time mixer: the audio-thread side of the engine
//!
//! One call to [`Mixer::render`] is one buffer callback:
//!
//! 1. apply pending topology commands (the only place attachments change)
//! 2. run every attached unit's audio-side update, exchange mixer meters
//! 3. process captured input through the input unit
//! 4. render playing events, each through its unit, into the output
//! 5. process the output unit and measure the final mix
//!
//! IMPORTANT: nothing on this path may lock, log, allocate or free. Unit
//! storage is preallocated for `max_dsp_units`, and audio halves leave this
//! thread only through the retired queue.

use crate::audio::command::{MixerCommand, MixerQueues, Retired};
use minstrel_core::domain::{
    AttachTarget, AudioBuffer, AudioSide, DspUnitHandle, EngineConfig, EventHandle, MeterAudio,
    MeterShared, SignalSource,
};
use std::sync::Arc;

struct MixerUnit {
    unit: DspUnitHandle,
    target: Option<AttachTarget>,
    audio: Box<dyn AudioSide>,
}

/// Audio-thread owner of every registered unit's audio half
pub struct Mixer {
    queues: MixerQueues,
    units: Vec<MixerUnit>,
    overflow: Vec<Retired>,
    meter_shared: Arc<MeterShared>,
    meters: MeterAudio,
    output_channels: usize,
    input_channels: usize,
    event_scratch: Vec<f32>,
    input_scratch: Vec<f32>,
}

impl Mixer {
    pub(crate) fn new(
        config: &EngineConfig,
        queues: MixerQueues,
        meter_shared: Arc<MeterShared>,
    ) -> Self {
        let output_samples = config.output_format().samples_per_buffer();
        let input_samples = config
            .input_format()
            .map_or(0, |format| format.samples_per_buffer());

        Self {
            queues,
            units: Vec::with_capacity(config.max_dsp_units),
            overflow: Vec::with_capacity(config.max_dsp_units),
            meter_shared,
            meters: MeterAudio::default(),
            output_channels: config.channels as usize,
            input_channels: config.input_channels as usize,
            event_scratch: vec![0.0; output_samples],
            input_scratch: vec![0.0; input_samples],
        }
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Interleaved samples expected by [`Mixer::render`]
    pub fn samples_per_buffer(&self) -> usize {
        self.event_scratch.len()
    }

    /// Units currently owned by the mixer, attached or not
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Target a unit is processing, as last applied by the mixer
    pub fn target_of(&self, unit: DspUnitHandle) -> Option<AttachTarget> {
        self.units
            .iter()
            .find(|u| u.unit == unit)
            .and_then(|u| u.target)
    }

    /// Render one buffer into `output` (interleaved, `samples_per_buffer` long)
    pub fn render(&mut self, source: &mut dyn SignalSource, output: &mut [f32]) {
        debug_assert_eq!(output.len(), self.event_scratch.len());

        self.apply_commands();
        self.update_audio_sides();
        self.process_input(source);

        output.fill(0.0);
        let mut out = AudioBuffer::new(output, self.output_channels);

        if !self.meters.paused {
            let units = &mut self.units;
            let mut scratch = AudioBuffer::new(&mut self.event_scratch, self.output_channels);

            source.render_events(
                &mut scratch,
                &mut |event: EventHandle, buffer: &mut AudioBuffer<'_>| {
                    if let Some(u) = find_target(units, AttachTarget::Event(event)) {
                        u.audio.process(buffer);
                    }
                    out.accumulate(buffer);
                },
            );

            if let Some(u) = find_target(&mut self.units, AttachTarget::Output) {
                u.audio.process(&mut out);
            }
        }

        self.meters.measure(&out);
    }

    fn apply_commands(&mut self) {
        self.flush_overflow();

        while let Ok(command) = self.queues.commands.pop() {
            match command {
                MixerCommand::Adopt { unit, audio } => {
                    if self.units.len() < self.units.capacity() {
                        self.units.push(MixerUnit {
                            unit,
                            target: None,
                            audio,
                        });
                    } else {
                        // Engine enforces the same limit; hand it straight back
                        self.retire(Retired { unit, audio });
                    }
                }
                MixerCommand::Attach { unit, target } | MixerCommand::Move { unit, to: target } => {
                    self.vacate(target, unit);
                    if let Some(u) = self.units.iter_mut().find(|u| u.unit == unit) {
                        u.target = Some(target);
                    }
                }
                MixerCommand::Detach { unit } => {
                    if let Some(u) = self.units.iter_mut().find(|u| u.unit == unit) {
                        u.target = None;
                    }
                }
                MixerCommand::Release { unit } => {
                    if let Some(index) = self.units.iter().position(|u| u.unit == unit) {
                        let MixerUnit { unit, audio, .. } = self.units.swap_remove(index);
                        self.retire(Retired { unit, audio });
                    }
                }
            }
        }
    }

    /// Detach whichever other unit still occupies `target`
    fn vacate(&mut self, target: AttachTarget, incoming: DspUnitHandle) {
        for u in self.units.iter_mut() {
            if u.unit != incoming && u.target == Some(target) {
                u.target = None;
            }
        }
    }

    fn retire(&mut self, retired: Retired) {
        if let Err(rtrb::PushError::Full(retired)) = self.queues.retired.push(retired) {
            // Within capacity by construction, so this never reallocates
            self.overflow.push(retired);
        }
    }

    fn flush_overflow(&mut self) {
        while let Some(retired) = self.overflow.pop() {
            if let Err(rtrb::PushError::Full(retired)) = self.queues.retired.push(retired) {
                self.overflow.push(retired);
                break;
            }
        }
    }

    fn update_audio_sides(&mut self) {
        for u in self.units.iter_mut().filter(|u| u.target.is_some()) {
            u.audio.update();
        }
        self.meters.update(&self.meter_shared);
    }

    fn process_input(&mut self, source: &mut dyn SignalSource) {
        if self.input_channels == 0 {
            return;
        }

        let mut input = AudioBuffer::new(&mut self.input_scratch, self.input_channels);
        if !source.capture_input(&mut input) {
            return;
        }

        if let Some(u) = find_target(&mut self.units, AttachTarget::Input) {
            u.audio.process(&mut input);
        }
    }
}

fn find_target(units: &mut [MixerUnit], target: AttachTarget) -> Option<&mut MixerUnit> {
    units.iter_mut().find(|u| u.target == Some(target))
}
