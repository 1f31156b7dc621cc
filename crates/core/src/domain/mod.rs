//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod dsp_unit;
pub mod meters;
pub mod registry;
pub mod routing;
pub mod shared;
pub mod units;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioBuffer, ChannelCount, SampleRate, StreamFormat};
pub use config::{ConfigError, EngineConfig};
pub use dsp_unit::{AudioSide, ControlSide, DspError, DspState, DspUnit, DspUnitBuilder};
pub use meters::{MeterAudio, MeterControl, MeterShared, MeterSnapshot};
pub use registry::{BankHandle, EventRegistry, RegistryError, Silence, SignalSource};
pub use routing::{AttachTarget, Attachment, AttachmentTable, DspUnitHandle, EventHandle, RouteChange};
pub use shared::{pack_f32_pair, unpack_f32_pair, Shared, SharedScalar};
