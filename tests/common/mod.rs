//! Shared helpers for integration tests.
//!
//! - `fixtures`: page fixtures and monitor builders
//! - `logger`: phase-tagged test output
//! - `log_capture`: tracing layer that records events for assertions

#![allow(dead_code)]

pub mod fixtures;
pub mod log_capture;
pub mod logger;
