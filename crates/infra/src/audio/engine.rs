//! Control-thread engine: unit registry, attachment routing and ticks
//!
//! The [`Engine`] is the only control-side entry point. It validates every
//! request synchronously, keeps the authoritative [`AttachmentTable`], and
//! forwards the resulting topology changes to the [`Mixer`] through the
//! command queue. The mixer applies them at the next buffer boundary.
//!
//! A released unit's audio half comes back through the retired queue and is
//! dropped here, on the control thread, during [`Engine::update`].

use crate::audio::command::{self, EngineQueues, MixerCommand};
use crate::audio::mixer::Mixer;
use minstrel_core::domain::{
    AttachTarget, Attachment, AttachmentTable, BankHandle, ConfigError, ControlSide, DspError,
    DspUnitBuilder, DspUnitHandle, EngineConfig, EventHandle, EventRegistry, MeterControl,
    MeterShared, MeterSnapshot, RegistryError, RouteChange,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("DSP unit error: {0}")]
    Dsp(#[from] DspError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid DSP unit handle: {0}")]
    InvalidHandle(DspUnitHandle),

    #[error("Invalid event handle: {0}")]
    InvalidEvent(EventHandle),

    #[error("No input stream configured")]
    InputUnavailable,

    #[error("State type mismatch for {0}")]
    StateTypeMismatch(DspUnitHandle),

    /// Units whose release is still in flight keep their slot until the
    /// mixer hands them back, so they count against the limit.
    #[error("DSP unit capacity exceeded ({0} units, including releases in flight)")]
    CapacityExceeded(usize),

    #[error("Command queue full ({needed} slots needed, {available} free)")]
    QueueFull { needed: usize, available: usize },
}

struct UnitEntry {
    name: String,
    control: Box<dyn ControlSide>,
    releasing: bool,
}

#[derive(Default)]
struct UnitSlot {
    generation: u32,
    entry: Option<UnitEntry>,
}

/// Control-side half of the engine
pub struct Engine {
    config: EngineConfig,
    registry: Box<dyn EventRegistry>,
    slots: Vec<UnitSlot>,
    free: Vec<u32>,
    table: AttachmentTable,
    queues: EngineQueues,
    meter_shared: Arc<MeterShared>,
    meters: MeterControl,
    ticks: u64,
}

impl Engine {
    /// Create an engine and the mixer it drives
    ///
    /// The mixer is meant to be moved to the audio thread; the two halves
    /// share only the lock-free queues and meter cells.
    pub fn new(config: EngineConfig, registry: Box<dyn EventRegistry>) -> Result<(Self, Mixer)> {
        config.validate()?;

        let (engine_queues, mixer_queues) =
            command::queues(config.command_queue_capacity, config.max_dsp_units);
        let meter_shared = Arc::new(MeterShared::default());
        let mixer = Mixer::new(&config, mixer_queues, Arc::clone(&meter_shared));

        info!(
            "Engine started: {} Hz, {} channels, {} frames/buffer, {} input channels",
            config.sample_rate, config.channels, config.frames_per_buffer, config.input_channels
        );

        let engine = Self {
            slots: Vec::with_capacity(config.max_dsp_units),
            free: Vec::new(),
            config,
            registry,
            table: AttachmentTable::new(),
            queues: engine_queues,
            meter_shared,
            meters: MeterControl::default(),
            ticks: 0,
        };

        Ok((engine, mixer))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Control ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Live units, excluding ones whose release is still in flight
    ///
    /// See [`Engine::pending_releases`] for the rest of the slot usage.
    pub fn unit_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| !entry.releasing)
            .count()
    }

    /// Released units the mixer has not handed back yet
    pub fn pending_releases(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.releasing)
            .count()
    }

    /// Register a unit; it starts unattached
    ///
    /// Fails with [`EngineError::CapacityExceeded`] once live units plus
    /// pending releases reach `max_dsp_units`.
    pub fn create_dsp_unit<C, A, S>(&mut self, builder: DspUnitBuilder<C, A, S>) -> Result<DspUnitHandle>
    where
        C: Send + 'static,
        A: Send + 'static,
        S: Send + Sync + 'static,
    {
        let unit = builder.build()?;
        self.reserve_queue(1)?;

        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.config.max_dsp_units => {
                self.slots.push(UnitSlot::default());
                (self.slots.len() - 1) as u32
            }
            None => return Err(EngineError::CapacityExceeded(self.config.max_dsp_units)),
        };

        let slot = &mut self.slots[index as usize];
        let handle = DspUnitHandle::new(index, slot.generation);
        let (name, control, audio) = unit.into_parts();

        debug!("Created DSP unit '{}' as {}", name, handle);
        slot.entry = Some(UnitEntry {
            name,
            control,
            releasing: false,
        });

        self.send(MixerCommand::Adopt {
            unit: handle,
            audio,
        });
        Ok(handle)
    }

    /// Attach `unit` to an event's chain, or detach whatever is there
    pub fn attach_to_event(&mut self, unit: Option<DspUnitHandle>, event: EventHandle) -> Result<()> {
        if !self.registry.is_valid(event) {
            return Err(EngineError::InvalidEvent(event));
        }
        self.route(unit, AttachTarget::Event(event))
    }

    /// Attach `unit` to the input stream, or detach whatever is there
    pub fn attach_to_input(&mut self, unit: Option<DspUnitHandle>) -> Result<()> {
        if self.config.input_format().is_none() {
            return Err(EngineError::InputUnavailable);
        }
        self.route(unit, AttachTarget::Input)
    }

    /// Attach `unit` to the final mix, or detach whatever is there
    pub fn attach_to_output(&mut self, unit: Option<DspUnitHandle>) -> Result<()> {
        self.route(unit, AttachTarget::Output)
    }

    /// Detach `unit` from its target; a no-op if it is unattached
    pub fn detach(&mut self, unit: DspUnitHandle) -> Result<()> {
        self.entry(unit)?;
        if self.table.attachment(unit) == Attachment::Unattached {
            return Ok(());
        }

        self.reserve_queue(1)?;
        if let Some(change) = self.table.detach(unit) {
            self.apply(change);
        }
        Ok(())
    }

    pub fn attachment(&self, unit: DspUnitHandle) -> Result<Attachment> {
        self.entry(unit)?;
        Ok(self.table.attachment(unit))
    }

    /// Release a unit
    ///
    /// The handle is invalid from now on. The control state is handed to the
    /// unit's release callback once the mixer has returned the audio half,
    /// during a later [`Engine::update`].
    pub fn release(&mut self, unit: DspUnitHandle) -> Result<()> {
        self.entry(unit)?;
        self.reserve_queue(1)?;

        self.table.detach(unit);
        if let Some(entry) = self.entry_mut(unit) {
            entry.releasing = true;
            debug!("Releasing DSP unit '{}' ({})", entry.name, unit);
        }
        self.send(MixerCommand::Release { unit });
        Ok(())
    }

    /// One control tick
    ///
    /// Collects units returned by the mixer, runs the control-side update of
    /// every attached unit and exchanges mixer meters.
    pub fn update(&mut self) {
        self.collect_retired();

        for (unit, _) in self.table.attached_units() {
            if let Some(entry) = self
                .slots
                .get_mut(unit.index())
                .and_then(|slot| slot.entry.as_mut())
            {
                entry.control.update();
            }
        }

        self.meters.update(&self.meter_shared);
        self.ticks += 1;
    }

    /// Typed control fields of a unit
    pub fn control<C: 'static>(&self, unit: DspUnitHandle) -> Result<&C> {
        self.entry(unit)?
            .control
            .downcast_state()
            .ok_or(EngineError::StateTypeMismatch(unit))
    }

    pub fn control_mut<C: 'static>(&mut self, unit: DspUnitHandle) -> Result<&mut C> {
        self.entry_mut(unit)
            .ok_or(EngineError::InvalidHandle(unit))?
            .control
            .downcast_state_mut()
            .ok_or(EngineError::StateTypeMismatch(unit))
    }

    pub fn unit_name(&self, unit: DspUnitHandle) -> Result<&str> {
        Ok(&self.entry(unit)?.name)
    }

    /// Silence the mix from the next buffer on
    pub fn set_paused(&mut self, paused: bool) {
        self.meters.paused = paused;
    }

    pub fn set_level_metering(&mut self, enabled: bool) {
        self.meters.level_metering = enabled;
    }

    /// Mixer meters as of the last tick
    pub fn meters(&self) -> MeterSnapshot {
        self.meters.snapshot
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_bank<P: AsRef<Path>>(&mut self, path: P) -> Result<BankHandle> {
        let bank = self.registry.load_bank(path.as_ref())?;
        info!("Loaded bank {}", bank);
        Ok(bank)
    }

    /// Unload a bank, detaching units from the events it invalidated
    pub fn unload_bank(&mut self, bank: BankHandle) -> Result<()> {
        let hosted = self
            .table
            .attached_units()
            .filter(|(_, target)| matches!(target, AttachTarget::Event(_)))
            .count();
        self.reserve_queue(hosted)?;

        self.registry.unload_bank(bank)?;

        let stale: Vec<EventHandle> = self
            .table
            .attached_units()
            .filter_map(|(_, target)| match target {
                AttachTarget::Event(event) if !self.registry.is_valid(event) => Some(event),
                _ => None,
            })
            .collect();

        for event in stale {
            if let Some(change) = self.table.detach_event(event) {
                self.apply(change);
            }
        }

        info!("Unloaded bank {}", bank);
        Ok(())
    }

    pub fn event_handle(&self, id: &str) -> Result<EventHandle> {
        Ok(self.registry.event_handle(id)?)
    }

    pub fn start_event(&mut self, event: EventHandle) -> Result<()> {
        Ok(self.registry.start(event)?)
    }

    pub fn stop_event(&mut self, event: EventHandle) -> Result<()> {
        Ok(self.registry.stop(event)?)
    }

    fn route(&mut self, unit: Option<DspUnitHandle>, target: AttachTarget) -> Result<()> {
        let Some(unit) = unit else {
            if self.table.unit_at(target).is_none() {
                return Ok(());
            }
            self.reserve_queue(1)?;
            if let Some(change) = self.table.detach_target(target) {
                self.apply(change);
            }
            return Ok(());
        };

        self.entry(unit)?;
        self.reserve_queue(2)?;
        for change in self.table.attach(unit, target) {
            self.apply(change);
        }
        Ok(())
    }

    fn apply(&mut self, change: RouteChange) {
        debug!("Route change: {:?}", change);
        let command = match change {
            RouteChange::Attach { unit, target } => MixerCommand::Attach { unit, target },
            RouteChange::Move { unit, to, .. } => MixerCommand::Move { unit, to },
            RouteChange::Detach { unit, .. } => MixerCommand::Detach { unit },
        };
        self.send(command);
    }

    fn send(&mut self, command: MixerCommand) {
        // Space is reserved before any bookkeeping changes
        if let Err(rtrb::PushError::Full(command)) = self.queues.commands.push(command) {
            warn!("Dropped mixer command {:?}: queue full", command);
        }
    }

    fn reserve_queue(&self, needed: usize) -> Result<()> {
        let available = self.queues.commands.slots();
        if available < needed {
            return Err(EngineError::QueueFull { needed, available });
        }
        Ok(())
    }

    fn collect_retired(&mut self) {
        while let Ok(retired) = self.queues.retired.pop() {
            drop(retired.audio);

            let unit = retired.unit;
            let Some(slot) = self.slots.get_mut(unit.index()) else {
                continue;
            };
            if slot.generation != unit.generation() {
                continue;
            }

            if let Some(entry) = slot.entry.take() {
                debug!("Released DSP unit '{}' ({})", entry.name, unit);
                entry.control.release();
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(unit.index() as u32);
        }
    }

    fn entry(&self, unit: DspUnitHandle) -> Result<&UnitEntry> {
        self.slots
            .get(unit.index())
            .filter(|slot| slot.generation == unit.generation())
            .and_then(|slot| slot.entry.as_ref())
            .filter(|entry| !entry.releasing)
            .ok_or(EngineError::InvalidHandle(unit))
    }

    fn entry_mut(&mut self, unit: DspUnitHandle) -> Option<&mut UnitEntry> {
        self.slots
            .get_mut(unit.index())
            .filter(|slot| slot.generation == unit.generation())
            .and_then(|slot| slot.entry.as_mut())
            .filter(|entry| !entry.releasing)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        info!("Shutting down engine");
        self.collect_retired();

        // Audio halves still owned by the mixer are dropped with it
        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot.entry.take() {
                entry.control.release();
            }
        }
    }
}
