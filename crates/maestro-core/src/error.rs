//! Error taxonomy.
//!
//! Resolution errors carry the failing variant; player errors are local and
//! returned to the caller; Maestro fan-out aggregates per-role outcomes.

use std::fmt;

use thiserror::Error;

use crate::models::{PlaybackState, SourceKind};

/// Why a source could not be turned into an openable handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    NotFound,
    NetworkError,
    DecodeError,
    FutureRejected,
}

impl fmt::Display for ResolutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::NetworkError => "network error",
            Self::DecodeError => "decode error",
            Self::FutureRejected => "future rejected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{variant} source: {kind}: {detail}")]
pub struct SourceResolutionError {
    pub kind: ResolutionErrorKind,
    pub variant: SourceKind,
    pub detail: String,
}

impl SourceResolutionError {
    pub fn new(kind: ResolutionErrorKind, variant: SourceKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            variant,
            detail: detail.into(),
        }
    }
}

/// Failure reported by the backend engine.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(String),
    #[error("output device: {0}")]
    Device(String),
    #[error("unsupported media: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Resolution(#[from] SourceResolutionError),
    #[error("{operation} is not valid while {state}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },
    #[error("player used after dispose")]
    UseAfterDispose,
    #[error("superseded by a newer source")]
    Superseded,
    #[error("index {index} out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("backend: {0}")]
    Backend(String),
}

impl From<BackendError> for PlayerError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Fan-out target owned by the Maestro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Music,
    Voice,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Music => "music",
            Self::Voice => "voice",
        };
        f.write_str(name)
    }
}

/// Outcome of one fan-out operation, in fan-out order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub operation: &'static str,
    pub outcomes: Vec<(Role, Result<(), PlayerError>)>,
}

impl FanOutReport {
    pub fn outcome(&self, role: Role) -> Option<&Result<(), PlayerError>> {
        self.outcomes.iter().find(|(r, _)| *r == role).map(|(_, o)| o)
    }

    pub fn succeeded(&self, role: Role) -> bool {
        matches!(self.outcome(role), Some(Ok(())))
    }

    pub fn failures(&self) -> impl Iterator<Item = (Role, &PlayerError)> {
        self.outcomes
            .iter()
            .filter_map(|(role, outcome)| outcome.as_ref().err().map(|e| (*role, e)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl fmt::Display for FanOutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.operation)?;
        for (role, outcome) in &self.outcomes {
            match outcome {
                Ok(()) => write!(f, " {}=ok", role)?,
                Err(e) => write!(f, " {}=failed ({})", role, e)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaestroError {
    #[error("aggregate failure: {0}")]
    AggregateFailure(FanOutReport),
    #[error("maestro used after dispose")]
    UseAfterDispose,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
