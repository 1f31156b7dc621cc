//! Output device driver using CPAL
//!
//! Platform APIs behind CPAL:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio
//!
//! The device may ask for any number of frames per callback, so rendered
//! buffers are staged and handed out in whatever chunks the device wants.

use crate::audio::mixer::Mixer;
use crate::audio::stream::{BackendError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use minstrel_core::domain::{EngineConfig, SignalSource};
use tracing::{error, info};

/// Running output stream; dropping it stops playback
pub struct CpalOutput {
    _stream: Stream,
    device_name: String,
}

impl CpalOutput {
    /// Open the default output device and start rendering into it
    pub fn start<S>(mut mixer: Mixer, mut source: S, config: &EngineConfig) -> Result<Self>
    where
        S: SignalSource + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BackendError::DeviceNotFound("default output".to_string()))?;

        #[allow(deprecated)]
        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        let cpal_config = CpalStreamConfig {
            channels: config.channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.frames_per_buffer),
        };

        info!(
            "Opening output stream: device={}, config={:?}",
            device_name, cpal_config
        );

        let mut staging = vec![0.0_f32; mixer.samples_per_buffer()];
        let mut cursor = staging.len();

        let stream = device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut written = 0;
                    while written < data.len() {
                        if cursor == staging.len() {
                            mixer.render(&mut source, &mut staging);
                            cursor = 0;
                        }
                        let n = (staging.len() - cursor).min(data.len() - written);
                        data[written..written + n].copy_from_slice(&staging[cursor..cursor + n]);
                        cursor += n;
                        written += n;
                    }
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| BackendError::StreamError(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| BackendError::StreamError(format!("Failed to start stream: {}", e)))?;

        Ok(Self {
            _stream: stream,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}
