// Licensed under the Apache-2.0 license

//! Shared logging seam.
//!
//! Components take a `Logger` as a defaulted generic parameter so that
//! production builds can run with `NoOpLogger` (zero cost) while tests or
//! debug builds inject something that records events.

/// Minimal logging interface for lifecycle events.
///
/// Messages are static strings; components report *what happened*, not
/// formatted payloads, so the trait stays allocation-free in `no_std`.
pub trait Logger {
    fn log(&mut self, message: &str);
}

/// Logger that discards everything.
#[derive(Default, Clone, Copy)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&mut self, _message: &str) {}
}
