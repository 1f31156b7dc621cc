//! Mixer-level meters and switches
//!
//! The mixer's own state crosses threads with the same three-group split as a
//! DSP unit: switches flow control → audio, measurements flow audio → control.
//! Left and right peaks are packed into one shared word so a reader never
//! pairs the left peak of one buffer with the right peak of another.

use crate::domain::audio::AudioBuffer;
use crate::domain::shared::{pack_f32_pair, unpack_f32_pair, Shared};
use serde::{Deserialize, Serialize};

/// Measurements of the latest mixed buffer, as seen by the control thread
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeterSnapshot {
    /// Frames mixed since the engine started
    pub frames_mixed: u64,
    /// Absolute peak of the left channel in the latest buffer
    pub peak_left: f32,
    /// Absolute peak of the right channel in the latest buffer
    pub peak_right: f32,
    /// Whether the latest buffer had samples outside [-1.0, 1.0]
    pub clipped: bool,
}

/// Control-thread fields
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterControl {
    pub paused: bool,
    pub level_metering: bool,
    pub snapshot: MeterSnapshot,
}

impl Default for MeterControl {
    fn default() -> Self {
        Self {
            paused: false,
            level_metering: true,
            snapshot: MeterSnapshot::default(),
        }
    }
}

impl MeterControl {
    pub fn update(&mut self, shared: &MeterShared) {
        let (peak_left, peak_right) = unpack_f32_pair(shared.peaks.load());
        self.snapshot = MeterSnapshot {
            frames_mixed: shared.frames_mixed.load(),
            peak_left,
            peak_right,
            clipped: shared.clipped.load(),
        };

        shared.paused.store(self.paused);
        shared.level_metering.store(self.level_metering);
    }
}

/// Fields crossing between the two threads
#[derive(Debug)]
pub struct MeterShared {
    frames_mixed: Shared<u64>,
    peaks: Shared<u64>,
    clipped: Shared<bool>,
    paused: Shared<bool>,
    level_metering: Shared<bool>,
}

impl Default for MeterShared {
    fn default() -> Self {
        Self {
            frames_mixed: Shared::new(0),
            peaks: Shared::new(pack_f32_pair(0.0, 0.0)),
            clipped: Shared::new(false),
            paused: Shared::new(false),
            level_metering: Shared::new(true),
        }
    }
}

/// Mixer-thread fields
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterAudio {
    pub paused: bool,
    pub level_metering: bool,
    pub frames_mixed: u64,
    pub peak_left: f32,
    pub peak_right: f32,
    pub clipped: bool,
}

impl Default for MeterAudio {
    fn default() -> Self {
        Self {
            paused: false,
            level_metering: true,
            frames_mixed: 0,
            peak_left: 0.0,
            peak_right: 0.0,
            clipped: false,
        }
    }
}

impl MeterAudio {
    #[inline]
    pub fn update(&mut self, shared: &MeterShared) {
        self.paused = shared.paused.load();
        self.level_metering = shared.level_metering.load();

        shared.frames_mixed.store(self.frames_mixed);
        shared.peaks.store(pack_f32_pair(self.peak_left, self.peak_right));
        shared.clipped.store(self.clipped);
    }

    /// Record one mixed buffer. Mono output reports the same peak on both sides.
    #[inline]
    pub fn measure(&mut self, buffer: &AudioBuffer<'_>) {
        self.frames_mixed += buffer.frames() as u64;

        if self.paused || !self.level_metering {
            self.peak_left = 0.0;
            self.peak_right = 0.0;
            self.clipped = false;
            return;
        }

        let peak = |channel: usize| buffer.channel(channel).fold(0.0_f32, |m, s| m.max(s.abs()));
        self.peak_left = peak(0);
        self.peak_right = if buffer.channels() > 1 {
            peak(1)
        } else {
            self.peak_left
        };
        self.clipped = buffer.samples().iter().any(|s| s.abs() > 1.0);
    }
}
