//! Startup privilege checks.
//!
//! The engine refuses to run inert: it must be elevated (unless the
//! operator opts out) and must be able to delete files under the root.

use std::fs::{self, OpenOptions};
use std::io::Write;

use tracing::debug;

use super::path_policy::ProtectedRoot;
use crate::error::GuardError;

/// Is the current process elevated (Administrator on Windows, euid 0 elsewhere)?
pub fn is_elevated() -> bool {
    #[cfg(windows)]
    {
        // SAFETY: no arguments, reads the process token.
        unsafe { winapi::um::shlobj::IsUserAnAdmin() != 0 }
    }

    #[cfg(unix)]
    {
        // SAFETY: geteuid has no failure modes.
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(any(windows, unix)))]
    {
        false
    }
}

/// Create and remove a scratch file directly under the root.
pub fn verify_delete_access(root: &ProtectedRoot) -> Result<(), GuardError> {
    let scratch = root
        .path()
        .join(format!(".copyguard-access-{}", std::process::id()));
    let denied = |e: std::io::Error| {
        GuardError::InsufficientPrivilege(format!(
            "cannot create and delete files under {}: {}",
            root.path().display(),
            e
        ))
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&scratch)
        .map_err(denied)?;
    file.write_all(b"copyguard").map_err(denied)?;
    drop(file);
    fs::remove_file(&scratch).map_err(denied)?;

    debug!("Delete access verified under {}", root.path().display());
    Ok(())
}

/// Full startup precondition.
pub fn ensure(root: &ProtectedRoot, require_elevation: bool) -> Result<(), GuardError> {
    if require_elevation && !is_elevated() {
        let needed = if cfg!(windows) {
            "administrator privileges"
        } else {
            "root privileges"
        };
        return Err(GuardError::InsufficientPrivilege(format!(
            "copyguard requires {} (set protection.require_elevation = false to skip)",
            needed
        )));
    }
    verify_delete_access(root)
}
