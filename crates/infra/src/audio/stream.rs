//! Audio thread drivers for the mixer
//!
//! [`AudioThread`] calls [`Mixer::render`] from a dedicated thread at the
//! buffer period, standing in for a device callback so the engine runs
//! headless. The `cpal` feature adds a real output device driver.

use crate::audio::mixer::Mixer;
use minstrel_core::domain::{Shared, SignalSource};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised while starting or stopping an audio driver
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to spawn audio thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Audio thread panicked")]
    Panicked,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Dedicated thread rendering one buffer per period
pub struct AudioThread<S: SignalSource + 'static> {
    running: Arc<Shared<bool>>,
    buffers: Arc<Shared<u64>>,
    handle: Option<JoinHandle<(Mixer, S)>>,
}

impl<S: SignalSource + 'static> AudioThread<S> {
    pub fn spawn(mut mixer: Mixer, mut source: S, period: Duration) -> Result<Self> {
        let running = Arc::new(Shared::new(true));
        let buffers = Arc::new(Shared::new(0_u64));

        let thread_running = Arc::clone(&running);
        let thread_buffers = Arc::clone(&buffers);

        info!(
            "Starting audio thread: {} samples every {:?}",
            mixer.samples_per_buffer(),
            period
        );

        let handle = thread::Builder::new()
            .name("minstrel-mixer".to_string())
            .spawn(move || {
                let mut output = vec![0.0; mixer.samples_per_buffer()];
                let mut rendered = 0_u64;
                let mut deadline = Instant::now();

                while thread_running.load() {
                    mixer.render(&mut source, &mut output);
                    rendered += 1;
                    thread_buffers.store(rendered);

                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        // Fell behind; don't try to catch up with a burst
                        deadline = now;
                    }
                }

                (mixer, source)
            })?;

        Ok(Self {
            running,
            buffers,
            handle: Some(handle),
        })
    }

    /// Buffers rendered since the thread started
    pub fn buffers_rendered(&self) -> u64 {
        self.buffers.load()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop rendering and hand the mixer and source back
    pub fn stop(mut self) -> Result<(Mixer, S)> {
        self.running.store(false);
        let handle = self.handle.take().ok_or(BackendError::Panicked)?;
        let parts = handle.join().map_err(|_| BackendError::Panicked)?;
        debug!("Audio thread stopped after {} buffers", self.buffers.load());
        Ok(parts)
    }
}

impl<S: SignalSource + 'static> Drop for AudioThread<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.running.store(false);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::Engine;
    use crate::audio::tone::ToneBank;
    use minstrel_core::domain::EngineConfig;

    #[test]
    fn test_thread_renders_until_stopped() {
        let (bank, source) = ToneBank::new(44_100);
        let (_engine, mixer) = Engine::new(EngineConfig::default(), Box::new(bank)).unwrap();

        let thread = AudioThread::spawn(mixer, source, Duration::from_millis(1)).unwrap();
        let started = Instant::now();
        while thread.buffers_rendered() < 3 && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(thread.is_running());

        let (mixer, _source) = thread.stop().unwrap();
        assert_eq!(mixer.output_channels(), 2);
    }
}
