//! Thin wrappers around OS primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: signal -> accounts -> scope

pub mod accounts;
pub mod scope;
pub mod signal;
