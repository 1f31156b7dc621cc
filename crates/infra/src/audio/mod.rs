//! Engine runtime: control-side engine, real-time mixer and their drivers

pub mod command;
#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod engine;
pub mod mixer;
pub mod stream;
pub mod tone;

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalOutput;
pub use engine::{Engine, EngineError};
pub use mixer::Mixer;
pub use stream::{AudioThread, BackendError};
pub use tone::{ToneBank, ToneInput, ToneSource};
