//! Clipboard channel for non-Windows desktops, backed by `clipboard-rs`.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use clipboard_rs::{
    Clipboard, ClipboardContext, ClipboardHandler, ClipboardWatcher, ClipboardWatcherContext,
    ContentFormat, WatcherShutdown,
};
use tracing::{error, info};

use super::{ClipboardAccess, ClipboardChannel, ClipboardSource, Registration, forward_snapshot};
use crate::error::{ClipboardError, GuardError};
use crate::events::{ClipboardSnapshot, EventSink};

/// The desktop clipboard. A context is opened per operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl ClipboardAccess for SystemClipboard {
    fn read_snapshot(&self) -> Result<Option<ClipboardSnapshot>, ClipboardError> {
        let ctx = ClipboardContext::new().map_err(|e| ClipboardError::Read(e.to_string()))?;
        if !ctx.has(ContentFormat::Files) {
            return Ok(None);
        }
        let files = ctx
            .get_files()
            .map_err(|e| ClipboardError::Read(e.to_string()))?;
        Ok(Some(ClipboardSnapshot::new(
            files.iter().map(|f| uri_to_path(f)).collect(),
        )))
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        let ctx = ClipboardContext::new().map_err(|e| ClipboardError::Clear(e.to_string()))?;
        ctx.clear().map_err(|e| ClipboardError::Clear(e.to_string()))
    }
}

struct SnapshotForwarder {
    sink: EventSink,
}

impl ClipboardHandler for SnapshotForwarder {
    fn on_clipboard_change(&mut self) {
        forward_snapshot(&SystemClipboard, &self.sink);
    }
}

impl ClipboardSource for SystemClipboard {
    fn open_channel(&self, sink: EventSink) -> Result<ClipboardChannel, GuardError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<WatcherShutdown, String>>();
        let handler_sink = sink.clone();

        let thread = thread::Builder::new()
            .name("copyguard-clipboard".into())
            .spawn(move || {
                let mut watcher = match ClipboardWatcherContext::<SnapshotForwarder>::new() {
                    Ok(watcher) => watcher,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let shutdown = watcher
                    .add_handler(SnapshotForwarder { sink: handler_sink })
                    .get_shutdown_channel();
                if ready_tx.send(Ok(shutdown)).is_err() {
                    return;
                }
                watcher.start_watch();
            })
            .map_err(|source| GuardError::Thread {
                name: "clipboard",
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(shutdown)) => {
                info!("Clipboard watcher registered");
                // The watcher reports changes only; evaluate what is already there.
                forward_snapshot(&SystemClipboard, &sink);
                Ok(ClipboardChannel::new(WatcherRegistration {
                    shutdown: Some(shutdown),
                    thread: Some(thread),
                }))
            }
            Ok(Err(msg)) => {
                let _ = thread.join();
                Err(GuardError::ClipboardRegistration(msg))
            }
            Err(_) => {
                let _ = thread.join();
                Err(GuardError::ClipboardRegistration(
                    "clipboard watcher thread exited before registering".into(),
                ))
            }
        }
    }
}

struct WatcherRegistration {
    shutdown: Option<WatcherShutdown>,
    thread: Option<JoinHandle<()>>,
}

impl Registration for WatcherRegistration {
    fn release(mut self: Box<Self>) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.stop();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Clipboard watcher thread panicked during shutdown");
        }
        info!("Clipboard watcher unregistered");
    }

    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

/// Clipboard file lists arrive as `file://` URIs on X11 and macOS.
fn uri_to_path(entry: &str) -> PathBuf {
    let Some(rest) = entry.strip_prefix("file://") else {
        return PathBuf::from(entry);
    };
    // Drop an authority component such as `localhost`.
    let rest = match rest.find('/') {
        Some(0) | None => rest,
        Some(idx) => &rest[idx..],
    };
    PathBuf::from(percent_decode(rest))
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(byte) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
