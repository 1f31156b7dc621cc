//! Minstrel runtime: the control-side engine, the real-time mixer and the
//! drivers that call the mixer once per audio buffer.

pub mod audio;
