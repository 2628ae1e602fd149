//! Error types for the transformation pipeline and object store.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pipeline.
///
/// Every variant raised by an OS call carries the underlying
/// [`io::Error`] as its source.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Path Errors
    // =========================================================================
    /// Path (or blob) does not exist or cannot be resolved.
    #[error("not found: {}: {source}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Path escapes its base or lacks the requested access mode.
    #[error("permission denied: {}: {reason}", path.display())]
    PermissionDenied {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Malformed identifier, specifier, or argument.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// Directory creation or allocation failed.
    #[error("resource exhausted: {}: {source}", path.display())]
    ResourceExhausted {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another holder owns the per-identifier lock.
    #[error("identifier is busy: {}", path.display())]
    Busy { path: PathBuf },

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// Child process creation failed.
    #[error("failed to spawn {}: {source}", program.display())]
    SpawnFailure {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Deposit collided with an existing object.
    #[error("object already exists: {}", path.display())]
    AlreadyExists {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file unreadable or malformed.
    #[error("invalid configuration at {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O, clock, or entropy failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Flat discriminant of [`Error`], for matching on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidFormat,
    ResourceExhausted,
    Busy,
    SpawnFailure,
    AlreadyExists,
    Config,
    Io,
}

impl Error {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidFormat(_) => ErrorKind::InvalidFormat,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::SpawnFailure { .. } => ErrorKind::SpawnFailure,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Builds a containment or access-mode denial.
    pub(crate) fn denied(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Maps an I/O failure on `path` onto the taxonomy.
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path, source },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path,
                reason: source.to_string(),
                source: Some(source),
            },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path, source },
            _ => Self::Io(source),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::InvalidFormat => "invalid format",
            Self::ResourceExhausted => "resource exhausted",
            Self::Busy => "busy",
            Self::SpawnFailure => "spawn failure",
            Self::AlreadyExists => "already exists",
            Self::Config => "configuration",
            Self::Io => "I/O",
        };
        f.write_str(name)
    }
}
