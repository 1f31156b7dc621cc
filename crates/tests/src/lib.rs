//! Cross-crate integration tests for Minstrel

#[cfg(test)]
mod dsp_integration;
