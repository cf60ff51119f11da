//! Shared error taxonomy.
//!
//! Every module-local error type (`catalog::CatalogError`,
//! `engine::EngineError`, `driver::DriverError`, ...) implements
//! [`Classified`] so the driver and controller can branch on the error
//! *family* without matching every variant of every error type.

use std::fmt;

/// Which family an error belongs to.
///
/// - `Transient`: retried with backoff.
/// - `Configuration`: surfaced immediately, never retried.
/// - `Dependency`: a view is permanently failed; the task degrades but
///   keeps rendering its last-known-good output.
/// - `Cancellation`: the operation observed context cancellation.
/// - `Programmer`: an invariant was violated; the task is isolated but
///   the controller keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Configuration,
    Dependency,
    Cancellation,
    Programmer,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Programmer => "programmer",
        };
        f.write_str(s)
    }
}

/// Implemented by every module-boundary error enum so callers can
/// dispatch on `.kind()` instead of matching every variant.
pub trait Classified {
    fn kind(&self) -> ErrorKind;

    fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}
