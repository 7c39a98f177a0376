//! Error types for provisioning operations.
//!
//! Errors are grouped into three categories. Validation errors happen
//! before anything is created, provisioning errors mean a resource reached
//! a state the pipeline has no recovery for, and transport errors come from
//! the provider boundary. None of them are retried.

use crate::types::{CatalogEntry, CatalogKind, ResourceKind};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for cloudkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad local input or a reference the provider doesn't know.
    Validation,
    /// A resource reached an unexpected state while converging.
    Provisioning,
    /// Request to the provider failed.
    Transport,
}

impl ErrorCategory {
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid input",
            Self::Provisioning => "Provisioning failed",
            Self::Transport => "Provider request failed",
        }
    }

    /// Actionable advice for this category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Nothing was created; fix the input and run again",
            Self::Provisioning => {
                "Resources created before the failure were left in place; remove them manually"
            }
            Self::Transport => {
                "Check credentials and connectivity; resources created so far were left in place"
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while validating and provisioning.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reference not present in the catalog.
    #[error("{kind} {reference} not found")]
    NotFound {
        kind: CatalogKind,
        reference: String,
        /// The full enumeration the reference was checked against.
        alternatives: Vec<CatalogEntry>,
    },

    /// Name that must be fresh is already taken.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: CatalogKind, name: String },

    /// Hostname has fewer than three labels.
    #[error("{hostname} is not a valid fully qualified domain name")]
    InvalidHostname { hostname: String },

    /// Any other rejected argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Local input file could not be read.
    #[error("could not read {path}: {source}")]
    InputFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Resource reported a status outside the expected vocabulary.
    #[error("unexpected status {status} for {kind} {name} ({id})")]
    UnexpectedState {
        kind: ResourceKind,
        id: String,
        name: String,
        status: String,
    },

    /// Resource did not converge within an explicit deadline.
    #[error("{kind} {name} ({id}) did not converge within {}s", .waited.as_secs())]
    Timeout {
        kind: ResourceKind,
        id: String,
        name: String,
        waited: Duration,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        message: String,
        status: Option<u16>,
    },

    /// Authentication against the identity service failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Response could not be understood.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Create an input file error with path context.
    pub fn input_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::InputFile {
            path: path.into(),
            source,
        }
    }

    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotFound { .. }
            | Error::AlreadyExists { .. }
            | Error::InvalidHostname { .. }
            | Error::InvalidInput(_)
            | Error::InputFile { .. } => ErrorCategory::Validation,
            Error::UnexpectedState { .. } | Error::Timeout { .. } => ErrorCategory::Provisioning,
            Error::Http { .. } | Error::Auth(_) | Error::InvalidResponse(_) => {
                ErrorCategory::Transport
            }
        }
    }

    /// Catalog entries to present to the operator, if any.
    #[must_use]
    pub fn alternatives(&self) -> &[CatalogEntry] {
        match self {
            Error::NotFound { alternatives, .. } => alternatives,
            _ => &[],
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Http {
                message: format!("HTTP {}", code),
                status: Some(code),
            },
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
