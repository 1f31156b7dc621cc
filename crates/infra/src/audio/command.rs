//! Lock-free queues between the engine and the mixer
//!
//! Two single-producer single-consumer `rtrb` ring buffers connect the
//! threads:
//!
//! - **commands** (control → mixer): topology changes, applied by the mixer at
//!   the start of a buffer and never in the middle of one.
//! - **retired** (mixer → control): audio halves of released units, handed back
//!   so their memory is freed on the control thread.
//!
//! Both queues are allocated once at engine start. Pushing and popping never
//! blocks or allocates.

use minstrel_core::domain::{AttachTarget, AudioSide, DspUnitHandle};
use rtrb::{Consumer, Producer, RingBuffer};
use std::fmt;

/// Commands sent from the engine to the mixer
pub enum MixerCommand {
    /// Take ownership of a new unit's audio half; it starts unattached
    Adopt {
        unit: DspUnitHandle,
        audio: Box<dyn AudioSide>,
    },
    /// Start processing `target` with an unattached unit
    Attach {
        unit: DspUnitHandle,
        target: AttachTarget,
    },
    /// Move an attached unit to another target
    Move {
        unit: DspUnitHandle,
        to: AttachTarget,
    },
    /// Stop processing; the unit stays with the mixer, unattached
    Detach { unit: DspUnitHandle },
    /// Hand the unit's audio half back to the engine
    Release { unit: DspUnitHandle },
}

impl MixerCommand {
    pub fn unit(&self) -> DspUnitHandle {
        match self {
            MixerCommand::Adopt { unit, .. }
            | MixerCommand::Attach { unit, .. }
            | MixerCommand::Move { unit, .. }
            | MixerCommand::Detach { unit }
            | MixerCommand::Release { unit } => *unit,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MixerCommand::Adopt { .. } => "Adopt",
            MixerCommand::Attach { .. } => "Attach",
            MixerCommand::Move { .. } => "Move",
            MixerCommand::Detach { .. } => "Detach",
            MixerCommand::Release { .. } => "Release",
        }
    }
}

impl fmt::Debug for MixerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.description(), self.unit())
    }
}

/// Audio half returned by the mixer after a release
pub struct Retired {
    pub unit: DspUnitHandle,
    pub audio: Box<dyn AudioSide>,
}

impl fmt::Debug for Retired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retired").field("unit", &self.unit).finish_non_exhaustive()
    }
}

/// Control-side ends of the queues
pub struct EngineQueues {
    pub commands: Producer<MixerCommand>,
    pub retired: Consumer<Retired>,
}

/// Mixer-side ends of the queues
pub struct MixerQueues {
    pub commands: Consumer<MixerCommand>,
    pub retired: Producer<Retired>,
}

/// Create both queues
///
/// The retired queue holds `max_units` entries: an audio half is in exactly
/// one place at a time, so the mixer can never find it full.
pub fn queues(command_capacity: usize, max_units: usize) -> (EngineQueues, MixerQueues) {
    let (command_tx, command_rx) = RingBuffer::new(command_capacity);
    let (retired_tx, retired_rx) = RingBuffer::new(max_units);

    (
        EngineQueues {
            commands: command_tx,
            retired: retired_rx,
        },
        MixerQueues {
            commands: command_rx,
            retired: retired_tx,
        },
    )
}
