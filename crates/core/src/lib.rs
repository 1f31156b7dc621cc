//! Minstrel core: platform-free domain types for exchanging DSP parameters
//! between a control thread and a real-time mixer thread.

pub mod domain;
