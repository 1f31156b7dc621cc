//! Audio buffer and stream format types
//!
//! The mixer hands DSP units an interleaved view over its own scratch memory.
//! Nothing here allocates, so these types are usable on the mixer thread.

use serde::{Deserialize, Serialize};

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }
}

/// Number of interleaved audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }

    pub fn from_count(count: u16) -> Self {
        match count {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => ChannelCount::Surround(n),
        }
    }
}

/// Fixed buffer geometry negotiated at engine start
///
/// Every buffer callback for the lifetime of the engine uses the same
/// channel count and frame count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    pub frames_per_buffer: usize,
}

impl StreamFormat {
    /// Samples in one interleaved buffer
    pub fn samples_per_buffer(&self) -> usize {
        self.frames_per_buffer * self.channels.count() as usize
    }

    /// Wall-clock length of one buffer
    pub fn buffer_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(
            self.frames_per_buffer as f64 / self.sample_rate.hz() as f64,
        )
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            channels: ChannelCount::Stereo,
            frames_per_buffer: 256,
        }
    }
}

/// Interleaved sample buffer borrowed for the duration of one callback
///
/// Trailing samples that do not make up a whole frame are not exposed.
#[derive(Debug)]
pub struct AudioBuffer<'a> {
    samples: &'a mut [f32],
    channels: usize,
    frames: usize,
}

impl<'a> AudioBuffer<'a> {
    pub fn new(samples: &'a mut [f32], channels: usize) -> Self {
        let frames = if channels == 0 { 0 } else { samples.len() / channels };
        let samples = &mut samples[..frames * channels];
        Self {
            samples,
            channels,
            frames,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        self.samples
    }

    /// Samples of one channel, stepping over the interleaving
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels.max(1))
            .copied()
            .take(if channel < self.channels { self.frames } else { 0 })
    }

    pub fn fill(&mut self, value: f32) {
        self.samples.fill(value);
    }

    /// Add `other` sample-by-sample into this buffer
    pub fn accumulate(&mut self, other: &AudioBuffer<'_>) {
        for (dst, src) in self.samples.iter_mut().zip(other.samples.iter()) {
            *dst += *src;
        }
    }
}
