//! Handles and DSP unit attachment bookkeeping
//!
//! Each unit is attached to at most one point in the signal graph, and each
//! point hosts at most one unit. [`AttachmentTable`] keeps both sides of that
//! relation on the control thread and reports the topology changes the mixer
//! must apply at its next buffer boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque handle to an event owned by the external engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventHandle(u32);

impl EventHandle {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

/// Generational handle to a DSP unit registered with an engine
///
/// A slot index is reused after release; the generation tells a stale handle
/// apart from the unit currently occupying the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DspUnitHandle {
    index: u32,
    generation: u32,
}

impl DspUnitHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DspUnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dsp#{}.{}", self.index, self.generation)
    }
}

/// Point in the signal graph a DSP unit can process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachTarget {
    /// Output of a single event
    Event(EventHandle),
    /// Captured input stream
    Input,
    /// Final mix, before it reaches the device
    Output,
}

impl fmt::Display for AttachTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachTarget::Event(event) => write!(f, "{event}"),
            AttachTarget::Input => f.write_str("input"),
            AttachTarget::Output => f.write_str("output"),
        }
    }
}

/// Attachment state of a DSP unit as seen by the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attachment {
    #[default]
    Unattached,
    Attached(AttachTarget),
}

/// Topology change implied by an attachment call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    /// Unattached unit starts processing `target`
    Attach {
        unit: DspUnitHandle,
        target: AttachTarget,
    },
    /// Attached unit moves from one target to another
    Move {
        unit: DspUnitHandle,
        from: AttachTarget,
        to: AttachTarget,
    },
    /// Unit stops processing `from` and becomes unattached
    Detach {
        unit: DspUnitHandle,
        from: AttachTarget,
    },
}

/// Unit ⇄ target relation, at most one of each per pair
#[derive(Debug, Default)]
pub struct AttachmentTable {
    by_unit: HashMap<DspUnitHandle, AttachTarget>,
    by_target: HashMap<AttachTarget, DspUnitHandle>,
}

impl AttachmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attachment(&self, unit: DspUnitHandle) -> Attachment {
        self.by_unit
            .get(&unit)
            .map_or(Attachment::Unattached, |t| Attachment::Attached(*t))
    }

    pub fn unit_at(&self, target: AttachTarget) -> Option<DspUnitHandle> {
        self.by_target.get(&target).copied()
    }

    pub fn attached_units(&self) -> impl Iterator<Item = (DspUnitHandle, AttachTarget)> + '_ {
        self.by_unit.iter().map(|(u, t)| (*u, *t))
    }

    pub fn len(&self) -> usize {
        self.by_unit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }

    /// Route `unit` to `target`
    ///
    /// A unit already attached elsewhere is moved; a different unit occupying
    /// `target` is displaced and becomes unattached. Changes are returned in
    /// the order the mixer must apply them.
    pub fn attach(&mut self, unit: DspUnitHandle, target: AttachTarget) -> Vec<RouteChange> {
        let current = self.by_unit.get(&unit).copied();
        if current == Some(target) {
            return Vec::new();
        }

        let mut changes = Vec::with_capacity(2);

        if let Some(incumbent) = self.by_target.remove(&target) {
            self.by_unit.remove(&incumbent);
            changes.push(RouteChange::Detach {
                unit: incumbent,
                from: target,
            });
        }

        match current {
            Some(from) => {
                self.by_target.remove(&from);
                changes.push(RouteChange::Move {
                    unit,
                    from,
                    to: target,
                });
            }
            None => changes.push(RouteChange::Attach { unit, target }),
        }

        self.by_unit.insert(unit, target);
        self.by_target.insert(target, unit);
        changes
    }

    /// Detach `unit` from wherever it is attached
    pub fn detach(&mut self, unit: DspUnitHandle) -> Option<RouteChange> {
        let from = self.by_unit.remove(&unit)?;
        self.by_target.remove(&from);
        Some(RouteChange::Detach { unit, from })
    }

    /// Detach whichever unit occupies `target`
    pub fn detach_target(&mut self, target: AttachTarget) -> Option<RouteChange> {
        let unit = self.by_target.remove(&target)?;
        self.by_unit.remove(&unit);
        Some(RouteChange::Detach { unit, from: target })
    }

    /// Detach the unit hosted by an event, e.g. when the event is released
    pub fn detach_event(&mut self, event: EventHandle) -> Option<RouteChange> {
        self.detach_target(AttachTarget::Event(event))
    }
}
