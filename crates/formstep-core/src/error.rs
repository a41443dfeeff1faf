//! Error types for formstep core systems.

use std::fmt;

use crate::async_runtime::AsyncRuntimeError;

/// The main error type for formstep core operations.
#[derive(Debug, Clone)]
pub enum CoreError {
    /// Signal-related error.
    Signal(SignalError),
    /// Async runtime error.
    Runtime(AsyncRuntimeError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(err) => write!(f, "Signal error: {err}"),
            Self::Runtime(err) => write!(f, "Async runtime error: {err}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Signal(err) => Some(err),
            Self::Runtime(err) => Some(err),
        }
    }
}

impl From<SignalError> for CoreError {
    fn from(err: SignalError) -> Self {
        Self::Signal(err)
    }
}

impl From<AsyncRuntimeError> for CoreError {
    fn from(err: AsyncRuntimeError) -> Self {
        Self::Runtime(err)
    }
}

/// Signal-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// The connection ID is invalid or has already been disconnected.
    InvalidConnection,
    /// The signal has been dropped and is no longer available.
    SignalDropped,
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConnection => write!(f, "Invalid or disconnected connection ID"),
            Self::SignalDropped => write!(f, "Signal has been dropped"),
        }
    }
}

impl std::error::Error for SignalError {}

/// A specialized Result type for formstep core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
