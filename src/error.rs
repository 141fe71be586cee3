//! Outward-facing sentinel errors and engine error classification.
//!
//! Callers of [`Db`](crate::Db) only ever see [`Error::NotFound`] or
//! [`Error::Internal`]. The engine error that caused an `Internal` result is
//! written to the log and dropped, so schema and driver details never reach
//! the caller.

use crate::executor::EngineError;
use std::fmt;

/// Sentinel error returned by every terminal operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// The requested record does not exist (expected, never logged)
    NotFound,
    /// Anything else; the cause has already been logged
    Internal,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Internal => write!(f, "internal server error"),
        }
    }
}

impl std::error::Error for Error {}

/// Result of [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No error at all
    None,
    /// The engine's record-not-found condition (possibly wrapped)
    NotFound,
    /// Every other failure
    Internal,
}

impl ErrorClass {
    /// Sentinel to hand back to the caller, `None` when there is no error
    pub fn sentinel(self) -> Option<Error> {
        match self {
            ErrorClass::None => None,
            ErrorClass::NotFound => Some(Error::NotFound),
            ErrorClass::Internal => Some(Error::Internal),
        }
    }
}

/// Classify an engine failure.
///
/// Walks the `source()` chain so an [`EngineError::RecordNotFound`] wrapped by
/// another error is still recognised as not-found.
pub fn classify(err: Option<&(dyn std::error::Error + 'static)>) -> ErrorClass {
    let Some(err) = err else {
        return ErrorClass::None;
    };

    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(EngineError::RecordNotFound) = e.downcast_ref::<EngineError>() {
            return ErrorClass::NotFound;
        }
        current = e.source();
    }
    ErrorClass::Internal
}
