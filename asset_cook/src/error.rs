use std::fmt;
use std::io;

use thiserror::Error;

/// Process-level outcome of a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    ValidationFailure,
    IoFailure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::ValidationFailure => 10,
            ExitStatus::IoFailure => 11,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitStatus::Success => "success",
            ExitStatus::ValidationFailure => "validation failure",
            ExitStatus::IoFailure => "io failure",
        };
        f.write_str(label)
    }
}

/// A failed unit. `unit` names the asset (and referrer, for dangling
/// references) the failure belongs to.
#[derive(Debug, Error)]
pub enum CookError {
    #[error("{unit}: {reason}")]
    Validation { unit: String, reason: String },
    #[error("{unit}: {source}")]
    Io {
        unit: String,
        #[source]
        source: io::Error,
    },
}

impl CookError {
    pub fn validation(unit: impl Into<String>, reason: impl fmt::Display) -> Self {
        CookError::Validation {
            unit: unit.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(unit: impl Into<String>, source: io::Error) -> Self {
        CookError::Io {
            unit: unit.into(),
            source,
        }
    }

    pub fn unit(&self) -> &str {
        match self {
            CookError::Validation { unit, .. } | CookError::Io { unit, .. } => unit,
        }
    }

    pub fn kind(&self) -> ExitStatus {
        match self {
            CookError::Validation { .. } => ExitStatus::ValidationFailure,
            CookError::Io { .. } => ExitStatus::IoFailure,
        }
    }
}
