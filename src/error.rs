//! Error types for the protection engine.
//!
//! Startup failures ([`GuardError`]) abort `start()`. Enforcement failures
//! ([`EnforcementError`]) are reported through the notification sink and
//! never stop event processing.

use std::io;
use std::path::PathBuf;

/// Fatal errors raised while bringing the protection engine up.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("protected root {} is unusable: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to register clipboard listener: {0}")]
    ClipboardRegistration(String),

    #[error("failed to watch protected root: {0}")]
    Watcher(#[from] notify::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Failures talking to the system clipboard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard read failed: {0}")]
    Read(String),

    #[error("clipboard clear failed: {0}")]
    Clear(String),
}

/// Recoverable failure of a single enforcement action.
#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    #[error("could not delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
}
