//! Crate-level error taxonomy.
//!
//! Decision components (the dwell gate and the control arbiter) never
//! return errors; they return decisions the executor interprets. The types
//! here cover everything else: invalid requests, configuration problems,
//! and adapter failures funneling up to the binary boundary.

use core::fmt;

use crate::app::ports::{BackendError, StoreError};

// ---------------------------------------------------------------------------
// Command rejection reasons
// ---------------------------------------------------------------------------

/// Why a submitted command (or one of its panels) was rejected.
///
/// These are expected operating conditions surfaced in the
/// [`CommandResult`](crate::app::commands::CommandResult) message and the
/// audit trail, not exceptions. None of them is ever retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Requested level outside [0, 100].
    InvalidLevel(u8),
    /// Target panel identifier does not exist.
    UnknownPanel(String),
    /// Target group identifier does not exist.
    UnknownGroup(String),
    /// An equal-or-conflicting owner holds one or more target panels and
    /// no override was requested. Carries the conflicting panel ids so the
    /// caller can re-submit with override.
    ControlConflict(Vec<String>),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLevel(level) => {
                write!(f, "invalid level {level} (expected 0-100)")
            }
            Self::UnknownPanel(id) => write!(f, "panel not found: {id}"),
            Self::UnknownGroup(id) => write!(f, "group not found: {id}"),
            Self::ControlConflict(panels) => {
                write!(f, "control conflict on: {}", panels.join(", "))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Configuration loading / validation failures.
///
/// Invalid values are rejected, not clamped: a bad environment override
/// must fail startup rather than silently run with a different number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    ParseFailed(&'static str),
    /// A config field failed range validation; the message names the field.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFailed(var) => write!(f, "cannot parse {var}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible startup / adapter operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Config(ConfigError),
    Store(StoreError),
    Backend(BackendError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Backend(e) => write!(f, "backend: {e}"),
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_panels() {
        let r = RejectReason::ControlConflict(vec!["P01".into(), "P07".into()]);
        assert_eq!(r.to_string(), "control conflict on: P01, P07");
    }

    #[test]
    fn error_wraps_and_displays() {
        let e: Error = BackendError::NotFound.into();
        assert_eq!(e.to_string(), "backend: device not found");
        let e: Error = ConfigError::ValidationFailed("min_dwell_secs").into();
        assert!(e.to_string().contains("min_dwell_secs"));
    }
}
