//! copyguard - one-way file protection for a single directory tree.
//!
//! Files inside the protected root may not leave through the clipboard, and
//! files that appear inside it from elsewhere are removed:
//! - Clipboard observation (viewer chain on Windows, `clipboard-rs` elsewhere)
//! - Recursive filesystem watch over the root
//! - Enforcer applying the path policy to both event streams
//! - ProtectionService owning the lifecycle of all of the above

pub mod cli;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod paths;
pub mod supervisor;
pub mod watcher;

pub use config::Config;
pub use error::{EnforcementError, GuardError};
pub use supervisor::{ProtectionService, ServiceOptions};
