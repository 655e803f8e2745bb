//! userbox: run untrusted source code as a disposable OS account
//!
//! Every request gets a fresh system account that exists only for the
//! duration of that request. The program runs under a generated shell script
//! with per-process ulimits, inside a transient systemd scope with memory,
//! CPU and task caps, and is killed when the wall-clock limit expires.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::accounts`]: Account database (useradd/userdel/pkill, passwd lookups)
//! - [`kernel::scope`]: Transient systemd scope command construction
//! - [`kernel::signal`]: Process-group kill, signal names, shutdown flag
//!
//! ## Execution Control ([`exec`])
//! - [`exec::runner`]: Launch, wall-clock timeout, combined output capture
//!
//! ## Judge Adapters ([`judge`])
//! - [`judge::adapter`]: Per-language compile and run commands
//! - [`judge::script`]: Launch script rendering
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::classifier`]: Raw exit state to outcome classification
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::identity`]: Disposable identity lifecycle, serialized account mutations
//! - [`safety::workspace`]: Private working directory and file ownership
//! - [`safety::cleanup`]: Sweep of accounts left by crashed runs
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: Engine configuration loading and validation
//! - [`config::presets`]: Per-language resource limits
//! - [`config::types`]: Shared types and errors
//!
//! The entry point is [`Executor::execute`](core::orchestrator::Executor::execute).

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Request orchestration
pub mod core;

// Judge adapters (language-specific compile/run commands)
pub mod judge;

// Verdict
pub mod verdict;

// Safety & Cleanup
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the userbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::config::EngineConfig;
pub use config::types::{
    ExecutionRequest, ExecutionResult, Language, OutcomeKind, ResourceLimits, SandboxError,
};
pub use core::orchestrator::Executor;
