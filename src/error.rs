use crate::edit::EditError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a patch. None of these leave the target
/// partially written.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("target not found: {}", path.display())]
    TargetNotFound { path: PathBuf },

    #[error("target is not a regular file: {}", path.display())]
    TargetNotRegularFile { path: PathBuf },

    #[error("target is not readable: {}: {reason}", path.display())]
    TargetNotReadable { path: PathBuf, reason: String },

    #[error("target is not writable: {}", path.display())]
    TargetNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("target is locked by another writer: {}", path.display())]
    TargetLocked { path: PathBuf },

    #[error("duplicate rule key: {key}")]
    DuplicateRuleKey { key: String },

    #[error("no substitution rules provided")]
    NoRulesProvided,

    #[error("invalid pattern for rule '{key}': {reason}")]
    InvalidPattern { key: String, reason: String },

    #[error("malformed structured document {}: {reason}", path.display())]
    MalformedStructuredDocument { path: PathBuf, reason: String },

    #[error("required rule '{key}' matched nothing in {}", path.display())]
    NoMatchForRequiredRule { key: String, path: PathBuf },

    #[error("rules '{first}' and '{second}' match overlapping text in {}", path.display())]
    OverlappingMatches {
        first: String,
        second: String,
        path: PathBuf,
    },

    #[error(
        "failed to rename {} over {}; temporary file left in place for recovery",
        temp_path.display(),
        target.display()
    )]
    RenameFailed {
        temp_path: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error during {operation} on {}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to preserve ownership of {}", path.display())]
    Ownership {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("edit error: {0}")]
    Edit(#[from] EditError),
}

impl PatchError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
