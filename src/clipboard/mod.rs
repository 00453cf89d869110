//! Clipboard observation channel.
//!
//! [`ClipboardSource::open_channel`] joins the OS clipboard notification
//! mechanism and returns a [`ClipboardChannel`] guard. Every change signal
//! is turned into a fresh [`ClipboardSnapshot`] read and pushed to the
//! enforcement queue; the signal handler itself does nothing else.
//!
//! On Windows the channel is a member of the clipboard viewer chain (see
//! [`windows`]). Elsewhere it is backed by the `clipboard-rs` watcher.

#[cfg(not(windows))]
mod portable;
#[cfg(windows)]
pub mod windows;

#[cfg(not(windows))]
pub use portable::SystemClipboard;
#[cfg(windows)]
pub use windows::SystemClipboard;

use tracing::{debug, warn};

use crate::error::{ClipboardError, GuardError};
use crate::events::{ClipboardSnapshot, EventSink, RawEvent};

/// Read and clear access to the system clipboard.
#[cfg_attr(test, mockall::automock)]
pub trait ClipboardAccess: Send + Sync {
    /// Current file-drop list, or `None` if the clipboard holds none.
    fn read_snapshot(&self) -> Result<Option<ClipboardSnapshot>, ClipboardError>;

    /// Empty the clipboard.
    fn clear(&self) -> Result<(), ClipboardError>;
}

/// Something that can deliver clipboard change signals.
pub trait ClipboardSource: Send + Sync {
    /// Register for change notifications, forwarding snapshots into `sink`.
    fn open_channel(&self, sink: EventSink) -> Result<ClipboardChannel, GuardError>;
}

/// An active OS registration. Released exactly once.
pub trait Registration: Send {
    fn release(self: Box<Self>);

    /// False once the registration has ended without being released, for
    /// example because the thread serving it exited.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Guard over a clipboard registration; unregisters on `stop` or drop.
pub struct ClipboardChannel {
    registration: Option<Box<dyn Registration>>,
}

impl ClipboardChannel {
    pub fn new(registration: impl Registration + 'static) -> Self {
        Self {
            registration: Some(Box::new(registration)),
        }
    }

    /// Registered and still receiving signals.
    pub fn is_active(&self) -> bool {
        self.registration
            .as_ref()
            .is_some_and(|registration| registration.is_alive())
    }

    /// Unregister. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.release();
            debug!("Clipboard channel released");
        }
    }
}

impl Drop for ClipboardChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read the clipboard and enqueue the result. Called from signal handlers.
pub(crate) fn forward_snapshot(access: &dyn ClipboardAccess, sink: &EventSink) {
    match access.read_snapshot() {
        Ok(snapshot) => {
            sink.submit(RawEvent::ClipboardChanged(snapshot));
        }
        Err(e) => warn!("Clipboard changed but could not be read: {}", e),
    }
}
