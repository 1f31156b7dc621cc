//! Collaborator interfaces for the external sound engine
//!
//! Wave banks, events and their playback belong to the engine embedding
//! Minstrel. The DSP layer only needs to resolve and validate event handles on
//! the control thread, and to have event and input audio rendered on the
//! mixer thread.

use crate::domain::audio::AudioBuffer;
use crate::domain::routing::EventHandle;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors reported by an event registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bank parsing error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Bank not loaded: {0}")]
    BankNotLoaded(BankHandle),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Invalid event handle: {0}")]
    InvalidEvent(EventHandle),

    #[error("Invalid bank: {0}")]
    InvalidBank(String),
}

/// Handle to a loaded bank of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankHandle(u32);

impl BankHandle {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BankHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank#{}", self.0)
    }
}

/// Control-thread view of the engine's events
pub trait EventRegistry: Send {
    fn load_bank(&mut self, path: &Path) -> Result<BankHandle>;

    /// Unloading invalidates every event handle from the bank
    fn unload_bank(&mut self, bank: BankHandle) -> Result<()>;

    fn event_handle(&self, id: &str) -> Result<EventHandle>;

    fn is_valid(&self, event: EventHandle) -> bool;

    fn start(&mut self, event: EventHandle) -> Result<()>;

    fn stop(&mut self, event: EventHandle) -> Result<()>;
}

/// Mixer-thread audio producer
///
/// Both methods run inside the buffer callback and carry the same real-time
/// constraints as a DSP unit's `process`.
pub trait SignalSource: Send {
    /// For every playing event, overwrite `scratch` with the event's next
    /// buffer and pass it to `sink` once.
    fn render_events(
        &mut self,
        scratch: &mut AudioBuffer<'_>,
        sink: &mut dyn FnMut(EventHandle, &mut AudioBuffer<'_>),
    );

    /// Fill `buffer` with captured input. Returns `false` when no input was
    /// captured for this buffer.
    fn capture_input(&mut self, buffer: &mut AudioBuffer<'_>) -> bool;
}

/// A source that plays nothing and captures nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct Silence;

impl SignalSource for Silence {
    fn render_events(
        &mut self,
        _scratch: &mut AudioBuffer<'_>,
        _sink: &mut dyn FnMut(EventHandle, &mut AudioBuffer<'_>),
    ) {
    }

    fn capture_input(&mut self, _buffer: &mut AudioBuffer<'_>) -> bool {
        false
    }
}
