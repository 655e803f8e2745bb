//! Configuration
//!
//! Engine settings, per-language limits, and shared types.

pub mod config;
pub mod presets;
pub mod types;
