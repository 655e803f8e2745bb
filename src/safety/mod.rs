//! Safety and cleanup
//!
//! Account lifecycle under a single-slot gate, per-identity workspaces, and
//! recovery of accounts left behind by crashed runs.

pub mod cleanup;
mod gate;
pub mod identity;
pub mod workspace;
