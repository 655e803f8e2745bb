//! Execution control
//!
//! Launches generated scripts as disposable accounts under a deadline.

pub mod runner;
