//! Built-in DSP units
//!
//! - **Gain meter**: applies a user gain to a signal and measures the RMS
//!   level of the result. Gain flows control → audio, level flows back.
//! - **Peak meter**: measures the absolute peak of a signal, typically the
//!   captured input. Level flows audio → control only.

use crate::domain::audio::AudioBuffer;
use crate::domain::dsp_unit::{DspState, DspUnitBuilder};
use crate::domain::shared::Shared;

// ============================================================================
// GAIN METER
// ============================================================================

/// Control-thread fields of the gain meter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMeterControl {
    /// Gain requested by the user
    pub gain: f32,
    /// Latest RMS level reported by the mixer
    pub rms: f32,
}

impl GainMeterControl {
    pub const MAX_GAIN: f32 = 4.0;

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, Self::MAX_GAIN);
    }

    pub fn adjust_gain(&mut self, delta: f32) {
        self.set_gain(self.gain + delta);
    }
}

/// Mixer-thread fields of the gain meter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMeterAudio {
    pub gain: f32,
    pub rms: f32,
}

#[derive(Debug, Default)]
pub struct GainMeterShared {
    pub gain: Shared<f32>,
    pub rms: Shared<f32>,
}

/// Gain meter unit, ready to be registered with an engine
pub fn gain_meter(
    initial_gain: f32,
) -> DspUnitBuilder<GainMeterControl, GainMeterAudio, GainMeterShared> {
    let gain = initial_gain.clamp(0.0, GainMeterControl::MAX_GAIN);
    let state = DspState::new(
        GainMeterControl { gain, rms: 0.0 },
        GainMeterAudio { gain, rms: 0.0 },
        GainMeterShared {
            gain: Shared::new(gain),
            rms: Shared::new(0.0),
        },
    );

    DspUnitBuilder::new(state)
        .name("gain-meter")
        .process(process_gain)
        .update_control_side(|control: &mut GainMeterControl, shared: &GainMeterShared| {
            control.rms = shared.rms.load();
            shared.gain.store(control.gain);
        })
        .update_audio_side(|audio: &mut GainMeterAudio, shared: &GainMeterShared| {
            audio.gain = shared.gain.load();
            shared.rms.store(audio.rms);
        })
}

fn process_gain(buffer: &mut AudioBuffer<'_>, audio: &mut GainMeterAudio) {
    let gain = audio.gain;
    let mut sum_squares = 0.0_f32;

    for sample in buffer.samples_mut() {
        *sample *= gain;
        sum_squares += *sample * *sample;
    }

    let count = buffer.samples().len();
    if count > 0 {
        audio.rms = (sum_squares / count as f32).sqrt();
    }
}

// ============================================================================
// PEAK METER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeakMeterControl {
    /// Latest absolute peak reported by the mixer
    pub level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeakMeterAudio {
    pub level: f32,
}

#[derive(Debug, Default)]
pub struct PeakMeterShared {
    pub level: Shared<f32>,
}

pub fn peak_meter() -> DspUnitBuilder<PeakMeterControl, PeakMeterAudio, PeakMeterShared> {
    DspUnitBuilder::new(DspState::default())
        .name("peak-meter")
        .process(|buffer: &mut AudioBuffer<'_>, audio: &mut PeakMeterAudio| {
            audio.level = buffer
                .samples()
                .iter()
                .fold(0.0_f32, |peak, s| peak.max(s.abs()));
        })
        .update_control_side(|control: &mut PeakMeterControl, shared: &PeakMeterShared| {
            control.level = shared.level.load();
        })
        .update_audio_side(|audio: &mut PeakMeterAudio, shared: &PeakMeterShared| {
            shared.level.store(audio.level);
        })
}
