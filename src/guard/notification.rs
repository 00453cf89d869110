//! Notification sinks for enforcement outcomes.
//!
//! The enforcer calls [`Notifier::notify`] from its worker thread. Sinks
//! must return promptly; anything that waits on a user is moved off-thread.

use tracing::warn;

pub const PROTECTION_TITLE: &str = "File protection active";
pub const FAILURE_TITLE: &str = "Enforcement failed";
pub const CLIPBOARD_BLOCKED: &str = "Copying files from the protected folder is not allowed.";
pub const CREATION_BLOCKED: &str = "Files can only be created within the protected folder.";

/// Fire-and-forget user notification.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        warn!(target: "copyguard::notify", "{}: {}", title, message);
    }
}

/// Logs and, on Windows, shows a message box on a detached thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        LogNotifier.notify(title, message);

        #[cfg(windows)]
        {
            let title = title.to_string();
            let message = message.to_string();
            let spawned = std::thread::Builder::new()
                .name("copyguard-popup".into())
                .spawn(move || win::message_box(&title, &message));
            if let Err(e) = spawned {
                warn!("Failed to show notification popup: {}", e);
            }
        }
    }
}

/// Pick the sink configured by `notifications.desktop`.
pub fn from_config(desktop: bool) -> std::sync::Arc<dyn Notifier> {
    if desktop {
        std::sync::Arc::new(DesktopNotifier)
    } else {
        std::sync::Arc::new(LogNotifier)
    }
}

#[cfg(windows)]
mod win {
    use std::ffi::OsStr;
    use std::iter::once;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;

    use winapi::um::winuser::{MB_ICONINFORMATION, MB_OK, MB_SETFOREGROUND, MessageBoxW};

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(once(0)).collect()
    }

    pub(super) fn message_box(title: &str, message: &str) {
        let title = wide(title);
        let message = wide(message);
        // SAFETY: both buffers are NUL-terminated and outlive the call.
        unsafe {
            MessageBoxW(
                ptr::null_mut(),
                message.as_ptr(),
                title.as_ptr(),
                MB_OK | MB_ICONINFORMATION | MB_SETFOREGROUND,
            );
        }
    }
}
