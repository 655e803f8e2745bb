//! Language adapters and script generation.
//!
//! The engine stays language-agnostic. Adapters define compile/run argument
//! vectors for each language; `script` wraps them with ulimit guards.

pub mod adapter;
pub mod languages;
pub mod registry;
pub mod script;
