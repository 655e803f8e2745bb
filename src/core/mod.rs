//! Core runtime
//!
//! Per-request orchestration of identity, workspace, run and classification.

pub mod orchestrator;
