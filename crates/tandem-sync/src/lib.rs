//! Synchronization core for collaborative code editing.
//!
//! This crate provides:
//! - `Workspace`: binds a local editor to a loro-backed shared workspace,
//!   defers calls until the document is ready, and tears everything down
//! - `ExclusiveGuard`: per-path reentrancy guard that keeps local edits from
//!   echoing back as remote ones
//! - `PositionTranslator`: pluggable index to line/column conversion
//! - Live selection presence with pruning on peer departure
//! - `DocumentProvider` implementations for standalone and loopback replicas

mod change;
mod config;
mod document;
mod error;
mod events;
mod guard;
mod presence;
mod provider;
mod translator;
mod tree;
mod voice;
mod workspace;

pub use change::FileDelta;
pub use config::{SessionOptions, TransportOptions, WorkspaceConfig};
pub use document::{DocumentHandle, IndexChange};
pub use error::{ConfigError, SyncError};
pub use events::{EventBus, WorkspaceEvent};
pub use guard::{BusyMark, ExclusiveGuard, GuardError};
pub use presence::{SelectionEntry, SelectionRange, SelectionUpdate};
pub use provider::{DocumentProvider, LocalProvider, LoopbackProvider};
pub use translator::{
    EditorChange, FnTranslator, Position, PositionTranslator, RemovedTranslator, UnsetTranslator,
    from_fn,
};
pub use tree::{EntryKind, TreeEntry};
pub use voice::VoiceChannel;
pub use workspace::{Command, Workspace, WorkspaceState};

// Re-export Loro types that consumers need
pub use loro::LoroDoc;
