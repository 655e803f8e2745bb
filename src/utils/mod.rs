//! Utilities
//!
//! Bounded output collection and external command invocation.

pub mod command;
pub mod output;
