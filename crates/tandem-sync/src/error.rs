//! Error types for workspace operations.

use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::guard::GuardError;

/// Errors that can occur while synchronizing a workspace.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SyncError {
    /// An action run under the exclusive guard failed.
    #[error("action on `{key}` failed")]
    #[diagnostic(code(tandem::sync::guarded))]
    Guarded {
        key: SmolStr,
        #[source]
        source: Box<SyncError>,
    },

    /// The path is bound to a directory, not a file.
    #[error("`{path}` is a directory")]
    #[diagnostic(code(tandem::sync::not_a_file))]
    NotAFile { path: SmolStr },

    /// The shared document handles are not bound yet.
    #[error("workspace is not ready")]
    #[diagnostic(code(tandem::sync::not_ready))]
    NotReady,

    /// `ready` was already delivered for this session.
    #[error("workspace is already ready")]
    #[diagnostic(code(tandem::sync::already_ready))]
    AlreadyReady,

    /// The workspace was destroyed.
    #[error("workspace was destroyed")]
    #[diagnostic(code(tandem::sync::destroyed))]
    Destroyed,

    /// Setting up the shared document failed.
    #[error("shared document setup failed: {0}")]
    #[diagnostic(code(tandem::sync::setup))]
    Setup(String),

    /// Loro CRDT error.
    #[error("loro error: {0}")]
    #[diagnostic(code(tandem::sync::loro))]
    Loro(String),

    /// A stored value could not be encoded or decoded.
    #[error("codec error")]
    #[diagnostic(code(tandem::sync::codec))]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl From<loro::LoroError> for SyncError {
    fn from(e: loro::LoroError) -> Self {
        SyncError::Loro(e.to_string())
    }
}

impl From<GuardError<SyncError>> for SyncError {
    fn from(e: GuardError<SyncError>) -> Self {
        SyncError::Guarded {
            key: e.key,
            source: Box::new(e.source),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    #[diagnostic(code(tandem::config::invalid))]
    Invalid { var: &'static str, value: String },

    #[error("chunk size must be greater than zero")]
    #[diagnostic(code(tandem::config::chunk_size))]
    ZeroChunkSize,
}
