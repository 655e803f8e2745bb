//! Observability
//!
//! Structured audit trail of execution lifecycle events.

pub mod audit;
