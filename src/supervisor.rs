//! Lifecycle of the protection engine.
//!
//! [`ProtectionService`] owns both observation channels and the single
//! enforcement worker that drains their shared queue:
//!
//! ```text
//!   clipboard thread ─┐
//!                     ├─> EventSink (bounded) ──> worker ──> Enforcer
//!   notify thread  ───┘
//! ```
//!
//! Only one service should run against a given root per machine. Nothing
//! coordinates multiple instances.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::clipboard::{ClipboardChannel, ClipboardSource, SystemClipboard};
use crate::error::GuardError;
use crate::events::{EventSink, QueueItem};
use crate::guard::{Enforcer, Notifier, ProtectedRoot, privilege};
use crate::watcher::FilesystemChannel;

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub queue_capacity: usize,
    pub require_elevation: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            require_elevation: true,
        }
    }
}

struct Running {
    sink: EventSink,
    worker: JoinHandle<()>,
    clipboard: ClipboardChannel,
    filesystem: FilesystemChannel,
}

pub struct ProtectionService {
    enforcer: Arc<Enforcer>,
    source: Arc<dyn ClipboardSource>,
    options: ServiceOptions,
    running: Mutex<Option<Running>>,
}

impl ProtectionService {
    pub fn new(
        enforcer: Arc<Enforcer>,
        source: Arc<dyn ClipboardSource>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            enforcer,
            source,
            options,
            running: Mutex::new(None),
        }
    }

    /// Service wired to the real system clipboard.
    pub fn with_system_clipboard(
        root: ProtectedRoot,
        notifier: Arc<dyn Notifier>,
        title: &str,
        options: ServiceOptions,
    ) -> Self {
        let enforcer = Enforcer::new(root, Arc::new(SystemClipboard), notifier).with_title(title);
        Self::new(Arc::new(enforcer), Arc::new(SystemClipboard), options)
    }

    pub fn root(&self) -> &ProtectedRoot {
        self.enforcer.root()
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Verify privileges and open both channels. No-op if already running.
    pub fn start(&self) -> Result<(), GuardError> {
        let mut state = self.state();
        if state.is_some() {
            debug!("Protection already running");
            return Ok(());
        }

        let root = self.enforcer.root();
        privilege::ensure(root, self.options.require_elevation)?;

        let (sink, rx) = EventSink::bounded(self.options.queue_capacity);
        let enforcer = self.enforcer.clone();
        let worker = thread::Builder::new()
            .name("copyguard-enforcer".into())
            .spawn(move || run_worker(enforcer, rx))
            .map_err(|source| GuardError::Thread {
                name: "enforcer",
                source,
            })?;

        let channels = FilesystemChannel::open(root, sink.clone()).and_then(|filesystem| {
            let clipboard = self.source.open_channel(sink.clone())?;
            Ok((filesystem, clipboard))
        });

        let (filesystem, clipboard) = match channels {
            Ok(channels) => channels,
            Err(e) => {
                sink.close();
                if worker.join().is_err() {
                    error!("Enforcement worker panicked");
                }
                return Err(e);
            }
        };

        info!("Protection active for {}", root.path().display());
        *state = Some(Running {
            sink,
            worker,
            clipboard,
            filesystem,
        });
        Ok(())
    }

    /// Release both channels, drain queued events and stop the worker.
    /// Safe to call any number of times.
    pub fn stop(&self) {
        let Some(running) = self.state().take() else {
            return;
        };
        let Running {
            sink,
            worker,
            mut clipboard,
            mut filesystem,
        } = running;

        clipboard.stop();
        filesystem.stop();
        sink.close();
        let dropped = sink.overflow_count();
        drop(sink);

        if worker.join().is_err() {
            error!("Enforcement worker panicked");
        }
        info!(dropped_events = dropped, "Protection stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Running with both channels still delivering. False once a channel
    /// ended on its own, which leaves the root only partly protected.
    pub fn is_healthy(&self) -> bool {
        self.state().as_ref().is_some_and(|running| {
            running.clipboard.is_active()
                && running.filesystem.is_active()
                && !running.worker.is_finished()
        })
    }

    /// Events dropped by the current session because the queue or the OS
    /// watcher overflowed.
    pub fn overflow_count(&self) -> u64 {
        self.state()
            .as_ref()
            .map(|running| running.sink.overflow_count())
            .unwrap_or(0)
    }
}

impl Drop for ProtectionService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(enforcer: Arc<Enforcer>, rx: Receiver<QueueItem>) {
    debug!("Enforcement worker started");
    for item in rx {
        match item {
            QueueItem::Event(event) => {
                if catch_unwind(AssertUnwindSafe(|| enforcer.handle(event))).is_err() {
                    error!("Enforcer panicked while handling an event; continuing");
                }
            }
            QueueItem::Shutdown => break,
        }
    }
    debug!("Enforcement worker exiting");
}
