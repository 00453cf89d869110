//! Raw events produced by the observation channels and the bounded queue
//! that carries them to the enforcement worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

use tracing::{debug, warn};

/// File paths held as a file-drop payload on the clipboard.
///
/// Read fresh on every clipboard signal; never cached across signals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    paths: Vec<PathBuf>,
}

impl ClipboardSnapshot {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for ClipboardSnapshot {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Deleted,
    Changed,
    Renamed,
}

/// One filesystem change under the protected root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    /// Previous name, only for a rename whose both halves were observed.
    pub old_path: Option<PathBuf>,
}

impl FileSystemEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Renamed,
            path: to.into(),
            old_path: Some(from.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Input to the enforcer from either channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// The clipboard changed; `None` when it holds no file-drop list.
    ClipboardChanged(Option<ClipboardSnapshot>),
    FileSystem(FileSystemEvent),
}

pub(crate) enum QueueItem {
    Event(RawEvent),
    Shutdown,
}

/// Sending half of the enforcement queue, handed to each channel.
///
/// Never blocks: OS callbacks must return promptly, so a full queue drops
/// the event and records an overflow instead.
#[derive(Clone)]
pub struct EventSink {
    tx: SyncSender<QueueItem>,
    overflow: Arc<AtomicU64>,
}

impl EventSink {
    pub(crate) fn bounded(capacity: usize) -> (Self, Receiver<QueueItem>) {
        let (tx, rx) = sync_channel(capacity.max(1));
        let sink = Self {
            tx,
            overflow: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Enqueue an event. Returns false if it was dropped.
    pub fn submit(&self, event: RawEvent) -> bool {
        match self.tx.try_send(QueueItem::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(QueueItem::Event(dropped))) => {
                let total = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    dropped_total = total,
                    "Enforcement queue overflow, event dropped: {:?}", dropped
                );
                false
            }
            Err(TrySendError::Full(QueueItem::Shutdown)) => false,
            Err(TrySendError::Disconnected(_)) => {
                debug!("Enforcement queue closed, event discarded");
                false
            }
        }
    }

    /// Count a loss reported by the OS watcher itself (its own buffer
    /// overflowed). Shares the counter with queue overflow.
    pub(crate) fn record_watcher_overflow(&self) {
        let total = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            overflow = true,
            dropped_total = total,
            "Filesystem watcher lost events, rescan requested"
        );
    }

    /// Events dropped because the queue or the OS watcher overflowed.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Blocking send of the shutdown marker, queued behind in-flight events.
    pub(crate) fn close(&self) {
        let _ = self.tx.send(QueueItem::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_counts_overflow() {
        let (sink, rx) = EventSink::bounded(1);
        let event = RawEvent::ClipboardChanged(None);

        assert!(sink.submit(event.clone()));
        assert!(!sink.submit(event.clone()));
        assert!(!sink.submit(event));
        assert_eq!(sink.overflow_count(), 2);

        drop(rx);
    }

    #[test]
    fn shutdown_is_queued_behind_events() {
        let (sink, rx) = EventSink::bounded(4);
        let created = RawEvent::FileSystem(FileSystemEvent::new(FsEventKind::Created, "/r/a"));
        sink.submit(created.clone());
        sink.close();

        assert!(matches!(rx.recv().unwrap(), QueueItem::Event(e) if e == created));
        assert!(matches!(rx.recv().unwrap(), QueueItem::Shutdown));
    }

    #[test]
    fn closed_queue_discards_without_overflow() {
        let (sink, rx) = EventSink::bounded(1);
        drop(rx);

        assert!(!sink.submit(RawEvent::ClipboardChanged(None)));
        assert_eq!(sink.overflow_count(), 0);
    }

    #[test]
    fn snapshot_collects_paths_in_order() {
        let snapshot: ClipboardSnapshot = ["/a", "/b"].into_iter().collect();
        assert_eq!(
            snapshot.paths(),
            &[PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert!(!snapshot.is_empty());
    }
}
