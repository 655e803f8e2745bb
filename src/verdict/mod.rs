//! Result classification
//!
//! Derives caller-facing outcomes as a pure function over raw run results.

pub mod classifier;
