//! Custom DSP units and their split state
//!
//! A DSP unit's state block is three groups of fields:
//!
//! - **control** (`C`): owned by the control thread, mutated freely between ticks.
//! - **audio** (`A`): owned by the mixer thread, touched only in the audio-side
//!   update and in `process`.
//! - **shared** (`S`): [`Shared`](crate::domain::shared::Shared) cells, touched
//!   only by the two update callbacks.
//!
//! Building a unit splits the block in two: a [`ControlSide`] that stays with
//! the engine and an [`AudioSide`] that travels to the mixer while the unit is
//! attached. The callback signatures give each side only the groups it may
//! use, so a process callback cannot reach control fields at all.

use crate::domain::audio::AudioBuffer;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DspError>;

/// Errors raised while assembling a DSP unit
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DspError {
    #[error("DSP unit '{0}' has no process callback")]
    MissingProcess(String),
}

/// Per-buffer processing callback; sees audio-side fields only
pub type ProcessFn<A> = Box<dyn FnMut(&mut AudioBuffer<'_>, &mut A) + Send>;

/// Control-tick exchange between control fields and shared fields
pub type ControlUpdateFn<C, S> = Box<dyn FnMut(&mut C, &S) + Send>;

/// Per-buffer exchange between audio fields and shared fields
pub type AudioUpdateFn<A, S> = Box<dyn FnMut(&mut A, &S) + Send>;

/// Runs on the control thread once the unit is released
pub type ReleaseFn<C> = Box<dyn FnOnce(C) + Send>;

/// State block of a DSP unit, grouped by owning thread
#[derive(Debug, Default, Clone)]
pub struct DspState<C, A, S> {
    pub control: C,
    pub audio: A,
    pub shared: S,
}

impl<C, A, S> DspState<C, A, S> {
    pub fn new(control: C, audio: A, shared: S) -> Self {
        Self {
            control,
            audio,
            shared,
        }
    }
}

/// Assembles a DSP unit from a state block and its callbacks
pub struct DspUnitBuilder<C, A, S> {
    name: String,
    state: DspState<C, A, S>,
    process: Option<ProcessFn<A>>,
    update_control: Option<ControlUpdateFn<C, S>>,
    update_audio: Option<AudioUpdateFn<A, S>>,
    on_release: Option<ReleaseFn<C>>,
}

impl<C, A, S> DspUnitBuilder<C, A, S>
where
    C: Send + 'static,
    A: Send + 'static,
    S: Send + Sync + 'static,
{
    pub fn new(state: DspState<C, A, S>) -> Self {
        Self {
            name: String::from("custom"),
            state,
            process: None,
            update_control: None,
            update_audio: None,
            on_release: None,
        }
    }

    /// Name used in logs and errors
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Buffer callback. Must be bounded-time: no locks, I/O or allocation.
    #[must_use]
    pub fn process<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut AudioBuffer<'_>, &mut A) + Send + 'static,
    {
        self.process = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn update_control_side<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut C, &S) + Send + 'static,
    {
        self.update_control = Some(Box::new(f));
        self
    }

    /// Runs on the mixer thread before `process`; same constraints as `process`.
    #[must_use]
    pub fn update_audio_side<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut A, &S) + Send + 'static,
    {
        self.update_audio = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_release<F>(mut self, f: F) -> Self
    where
        F: FnOnce(C) + Send + 'static,
    {
        self.on_release = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<DspUnit> {
        let process = self
            .process
            .ok_or_else(|| DspError::MissingProcess(self.name.clone()))?;

        let DspState {
            control,
            audio,
            shared,
        } = self.state;
        let shared = Arc::new(shared);

        Ok(DspUnit {
            name: self.name,
            control: Box::new(ControlHalf {
                state: control,
                shared: Arc::clone(&shared),
                update: self.update_control,
                on_release: self.on_release,
            }),
            audio: Box::new(AudioHalf {
                state: audio,
                shared,
                update: self.update_audio,
                process,
            }),
        })
    }
}

/// Control-thread half of a DSP unit
pub trait ControlSide: Send {
    /// Exchange control fields with shared fields; once per control tick.
    fn update(&mut self);

    fn state(&self) -> &dyn Any;

    fn state_mut(&mut self) -> &mut dyn Any;

    /// Consume the half, handing the control state to the release callback.
    fn release(self: Box<Self>);
}

impl<'a> dyn ControlSide + 'a {
    pub fn downcast_state<C: 'static>(&self) -> Option<&C> {
        self.state().downcast_ref()
    }

    pub fn downcast_state_mut<C: 'static>(&mut self) -> Option<&mut C> {
        self.state_mut().downcast_mut()
    }
}

/// Mixer-thread half of a DSP unit
pub trait AudioSide: Send {
    /// Exchange audio fields with shared fields; once per buffer, before `process`.
    fn update(&mut self);

    /// Process one buffer in place. Empty buffers are skipped.
    fn process(&mut self, buffer: &mut AudioBuffer<'_>);
}

struct ControlHalf<C, S> {
    state: C,
    shared: Arc<S>,
    update: Option<ControlUpdateFn<C, S>>,
    on_release: Option<ReleaseFn<C>>,
}

impl<C, S> ControlSide for ControlHalf<C, S>
where
    C: Send + 'static,
    S: Send + Sync + 'static,
{
    fn update(&mut self) {
        if let Some(update) = self.update.as_mut() {
            update(&mut self.state, &self.shared);
        }
    }

    fn state(&self) -> &dyn Any {
        &self.state
    }

    fn state_mut(&mut self) -> &mut dyn Any {
        &mut self.state
    }

    fn release(self: Box<Self>) {
        let ControlHalf {
            state, on_release, ..
        } = *self;
        if let Some(on_release) = on_release {
            on_release(state);
        }
    }
}

struct AudioHalf<A, S> {
    state: A,
    shared: Arc<S>,
    update: Option<AudioUpdateFn<A, S>>,
    process: ProcessFn<A>,
}

impl<A, S> AudioSide for AudioHalf<A, S>
where
    A: Send + 'static,
    S: Send + Sync + 'static,
{
    #[inline]
    fn update(&mut self) {
        if let Some(update) = self.update.as_mut() {
            update(&mut self.state, &self.shared);
        }
    }

    #[inline]
    fn process(&mut self, buffer: &mut AudioBuffer<'_>) {
        if buffer.is_empty() {
            return;
        }
        (self.process)(buffer, &mut self.state);
    }
}

/// A built DSP unit, not yet handed to an engine
pub struct DspUnit {
    name: String,
    control: Box<dyn ControlSide>,
    audio: Box<dyn AudioSide>,
}

impl DspUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn control(&self) -> &dyn ControlSide {
        self.control.as_ref()
    }

    pub fn control_mut(&mut self) -> &mut dyn ControlSide {
        self.control.as_mut()
    }

    pub fn audio_mut(&mut self) -> &mut dyn AudioSide {
        self.audio.as_mut()
    }

    pub fn into_parts(self) -> (String, Box<dyn ControlSide>, Box<dyn AudioSide>) {
        (self.name, self.control, self.audio)
    }
}

impl fmt::Debug for DspUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DspUnit").field("name", &self.name).finish_non_exhaustive()
    }
}
