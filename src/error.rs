//! Error kinds shared across the collection and supervision subsystems.
//!
//! Matches the policy table: some kinds are soft (skip and continue), some
//! are hard (fail the whole sample/tick), some just report back to a caller.

use std::fmt;

/// A single `/proc` entry disappeared or failed to open mid-scan.
/// Policy: skip the entry, keep scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientParse {
    pub message: String,
}

impl TransientParse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl fmt::Display for TransientParse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A file opened but its content violates the documented format.
/// Policy: fail the whole sample, fail the tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardParse {
    pub message: String,
}

impl HardParse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl fmt::Display for HardParse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HardParse {}

/// Result of collecting one kernel source: either a hard failure of the
/// whole sample, or a value possibly accompanied by entries that were
/// soft-skipped.
#[derive(Debug, Clone)]
pub struct Collected<T> {
    pub value: T,
    pub skipped: Vec<TransientParse>,
}

impl<T> Collected<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            skipped: Vec::new(),
        }
    }
}

pub type CollectResult<T> = Result<Collected<T>, HardParse>;

/// Errors surfaced by the admin dispatch surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// Caller passed an unparseable or out-of-range argument.
    InvalidInput(String),
    /// Operation not permitted in the controller's/supervisor's current state.
    InvalidState(String),
    /// Caller's effective UID is not SYSTEM for a privileged call.
    AuthDenied,
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            AdminError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            AdminError::AuthDenied => write!(f, "caller is not the system identity"),
        }
    }
}

impl std::error::Error for AdminError {}

/// Errors surfaced by the process supervisor's registry and liveness paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// Binding the death-watch / sending a challenge failed.
    Transport(String),
    /// A liveness reply cited a session not in any tier's pinged-client map,
    /// or one whose handle does not match.
    UnknownSession,
    /// The targeted registration does not exist.
    NotFound,
    /// Caller's effective UID is not SYSTEM for a privileged call.
    AuthDenied,
    /// A second, different monitor tried to register while one exists.
    MonitorConflict,
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::Transport(msg) => write!(f, "transport error: {msg}"),
            SupervisorError::UnknownSession => write!(f, "unknown session id"),
            SupervisorError::NotFound => write!(f, "registration not found"),
            SupervisorError::AuthDenied => write!(f, "caller is not the system identity"),
            SupervisorError::MonitorConflict => {
                write!(f, "a different monitor is already registered")
            }
        }
    }
}

impl std::error::Error for SupervisorError {}
