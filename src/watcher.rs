//! Recursive filesystem watch over the protected root.
//!
//! A move into the root from outside reaches the watcher as the second half
//! of a rename. [`EventTranslator`] pairs rename halves so that only a half
//! with no partner inside the watch becomes a `Created` event.

use std::collections::VecDeque;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::GuardError;
use crate::events::{EventSink, FileSystemEvent, FsEventKind, RawEvent};
use crate::guard::ProtectedRoot;

/// Unmatched `From` trackers kept for pairing.
const PENDING_RENAMES: usize = 64;

/// Owns the OS watch. Dropping it (or calling [`stop`](Self::stop)) ends
/// delivery.
pub struct FilesystemChannel {
    watcher: Option<RecommendedWatcher>,
}

impl FilesystemChannel {
    pub fn open(root: &ProtectedRoot, sink: EventSink) -> Result<Self, GuardError> {
        let mut translator = EventTranslator::new(root.clone());
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            dispatch(res, &mut translator, &sink);
        })?;

        watcher.watch(root.path(), RecursiveMode::Recursive)?;
        info!("Watching protected root: {}", root.path().display());

        Ok(Self {
            watcher: Some(watcher),
        })
    }

    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }

    /// Dispose of the watch. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            debug!("Filesystem watch disposed");
        }
    }
}

impl Drop for FilesystemChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the notify callback. Returns how many events were queued.
pub(crate) fn dispatch(
    res: notify::Result<Event>,
    translator: &mut EventTranslator,
    sink: &EventSink,
) -> usize {
    match res {
        Ok(event) if event.need_rescan() => {
            // The OS buffer overflowed; creations may have been missed.
            sink.record_watcher_overflow();
            0
        }
        Ok(event) => {
            let mut queued = 0;
            for fs_event in translator.translate(&event) {
                if sink.submit(RawEvent::FileSystem(fs_event)) {
                    queued += 1;
                }
            }
            queued
        }
        Err(e) => {
            warn!("Watch error: {:?}", e);
            0
        }
    }
}

/// Maps `notify` events onto [`FileSystemEvent`]s, remembering the `From`
/// half of renames long enough to recognise the matching `To`.
pub(crate) struct EventTranslator {
    root: ProtectedRoot,
    /// `From` halves carrying a tracker (inotify cookie).
    pending: VecDeque<usize>,
    /// The previous event was a `From` half without a tracker. Backends
    /// that report no tracker deliver the two halves back to back.
    untracked_from: bool,
}

impl EventTranslator {
    pub(crate) fn new(root: ProtectedRoot) -> Self {
        Self {
            root,
            pending: VecDeque::with_capacity(PENDING_RENAMES),
            untracked_from: false,
        }
    }

    pub(crate) fn translate(&mut self, event: &Event) -> Vec<FileSystemEvent> {
        let untracked_from = std::mem::take(&mut self.untracked_from);
        let tracker = event.tracker();

        let kind = match event.kind {
            EventKind::Create(_) => FsEventKind::Created,
            EventKind::Remove(_) => FsEventKind::Deleted,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    if self.root.contains(from) {
                        return vec![FileSystemEvent::renamed(from.clone(), to.clone())];
                    }
                    return vec![FileSystemEvent::new(FsEventKind::Created, to.clone())];
                }
                FsEventKind::Renamed
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.note_from(tracker);
                FsEventKind::Renamed
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                self.arrival_kind(tracker, untracked_from)
            }
            // FSEvents does not say which half it saw: the old name is gone,
            // the new name exists.
            EventKind::Modify(ModifyKind::Name(_)) => match event.paths.first() {
                Some(path) if path.exists() => self.arrival_kind(tracker, untracked_from),
                _ => {
                    self.note_from(tracker);
                    FsEventKind::Renamed
                }
            },
            EventKind::Modify(_) => FsEventKind::Changed,
            EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
        };
        event
            .paths
            .iter()
            .map(|path| FileSystemEvent::new(kind, path.clone()))
            .collect()
    }

    fn note_from(&mut self, tracker: Option<usize>) {
        match tracker {
            Some(cookie) => {
                if self.pending.len() == PENDING_RENAMES {
                    self.pending.pop_front();
                }
                self.pending.push_back(cookie);
            }
            None => self.untracked_from = true,
        }
    }

    /// `Renamed` when the source half was seen inside the watch, otherwise
    /// the entry came from outside and counts as a creation.
    fn arrival_kind(&mut self, tracker: Option<usize>, untracked_from: bool) -> FsEventKind {
        let paired = match tracker {
            Some(cookie) => match self.pending.iter().position(|&c| c == cookie) {
                Some(index) => {
                    self.pending.remove(index);
                    true
                }
                None => false,
            },
            None => untracked_from,
        };
        if paired {
            FsEventKind::Renamed
        } else {
            FsEventKind::Created
        }
    }
}
