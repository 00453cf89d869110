//! The policy engine.
//!
//! Each [`RawEvent`] is evaluated on its own against the protected root and
//! turned into at most one [`EnforcementAction`]. Every action and every
//! failed action produces exactly one notification.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, warn};

use super::notification::{
    CLIPBOARD_BLOCKED, CREATION_BLOCKED, FAILURE_TITLE, Notifier, PROTECTION_TITLE,
};
use super::path_policy::ProtectedRoot;
use crate::clipboard::ClipboardAccess;
use crate::error::EnforcementError;
use crate::events::{ClipboardSnapshot, FileSystemEvent, FsEventKind, RawEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementAction {
    None,
    ClearClipboard,
    DeleteFile(PathBuf),
}

/// What the policy decided for one event, and the message to show for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementDecision {
    pub action: EnforcementAction,
    pub reason: &'static str,
}

impl EnforcementDecision {
    fn none() -> Self {
        Self {
            action: EnforcementAction::None,
            reason: "",
        }
    }
}

/// Result of handling one event.
#[derive(Debug)]
pub enum Outcome {
    NoAction,
    Enforced(EnforcementAction),
    Failed(EnforcementError),
}

pub struct Enforcer {
    root: ProtectedRoot,
    clipboard: Arc<dyn ClipboardAccess>,
    notifier: Arc<dyn Notifier>,
    title: String,
    /// Set just before we clear the clipboard; consumed by the next
    /// clipboard signal that carries no file list, which is our own write.
    self_clear_pending: AtomicBool,
}

impl Enforcer {
    pub fn new(
        root: ProtectedRoot,
        clipboard: Arc<dyn ClipboardAccess>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            root,
            clipboard,
            notifier,
            title: PROTECTION_TITLE.to_string(),
            self_clear_pending: AtomicBool::new(false),
        }
    }

    /// Override the title used for protection notifications.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn root(&self) -> &ProtectedRoot {
        &self.root
    }

    /// Decide what to do about a clipboard change. Pure.
    pub fn evaluate_clipboard(&self, snapshot: Option<&ClipboardSnapshot>) -> EnforcementDecision {
        let Some(snapshot) = snapshot else {
            return EnforcementDecision::none();
        };
        if snapshot.paths().iter().any(|p| self.root.contains(p)) {
            EnforcementDecision {
                action: EnforcementAction::ClearClipboard,
                reason: CLIPBOARD_BLOCKED,
            }
        } else {
            EnforcementDecision::none()
        }
    }

    /// Decide what to do about a filesystem change. Pure.
    ///
    /// The watcher cannot tell who created a file, so every creation under
    /// the root is treated as a foreign copy. So is a rename whose source
    /// lies outside the root.
    pub fn evaluate_file_event(&self, event: &FileSystemEvent) -> EnforcementDecision {
        let arrived = match event.kind {
            FsEventKind::Created => true,
            FsEventKind::Renamed => event
                .old_path
                .as_deref()
                .is_some_and(|from| !self.root.contains(from)),
            FsEventKind::Deleted | FsEventKind::Changed => false,
        };
        if arrived && self.root.contains(event.path()) && !self.root.is_root(event.path()) {
            EnforcementDecision {
                action: EnforcementAction::DeleteFile(event.path.clone()),
                reason: CREATION_BLOCKED,
            }
        } else {
            EnforcementDecision::none()
        }
    }

    /// Evaluate and act on one event.
    pub fn handle(&self, event: RawEvent) -> Outcome {
        let decision = match &event {
            RawEvent::ClipboardChanged(snapshot) => {
                if snapshot.as_ref().is_none_or(ClipboardSnapshot::is_empty) {
                    if self.self_clear_pending.swap(false, Ordering::SeqCst) {
                        debug!("Ignoring clipboard change caused by our own clear");
                    }
                    return Outcome::NoAction;
                }
                self.evaluate_clipboard(snapshot.as_ref())
            }
            RawEvent::FileSystem(fs_event) => self.evaluate_file_event(fs_event),
        };

        if decision.action == EnforcementAction::None {
            debug!("No action for {:?}", event);
            return Outcome::NoAction;
        }

        match self.apply(&decision.action) {
            Ok(()) => {
                warn!("Enforced {:?}", decision.action);
                self.notifier.notify(&self.title, decision.reason);
                Outcome::Enforced(decision.action)
            }
            // Already gone: a removed directory's children still report
            // their own creation, and some backends report one arrival twice.
            Err(EnforcementError::Delete { path, source })
                if source.kind() == io::ErrorKind::NotFound =>
            {
                debug!("{} no longer exists", path.display());
                Outcome::NoAction
            }
            Err(e) => {
                error!("Enforcement of {:?} failed: {}", decision.action, e);
                self.notifier.notify(
                    FAILURE_TITLE,
                    &format!("Failed to enforce protection: {}", e),
                );
                Outcome::Failed(e)
            }
        }
    }

    fn apply(&self, action: &EnforcementAction) -> Result<(), EnforcementError> {
        match action {
            EnforcementAction::None => Ok(()),
            EnforcementAction::ClearClipboard => {
                self.self_clear_pending.store(true, Ordering::SeqCst);
                self.clipboard.clear().inspect_err(|_| {
                    self.self_clear_pending.store(false, Ordering::SeqCst);
                })?;
                Ok(())
            }
            EnforcementAction::DeleteFile(path) => {
                remove_entry(path).map_err(|source| EnforcementError::Delete {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MockClipboardAccess;
    use crate::error::ClipboardError;
    use crate::guard::notification::MockNotifier;
    use mockall::predicate::eq;

    fn enforcer(
        root: &Path,
        clipboard: MockClipboardAccess,
        notifier: MockNotifier,
    ) -> Enforcer {
        Enforcer::new(
            ProtectedRoot::new_unchecked(root),
            Arc::new(clipboard),
            Arc::new(notifier),
        )
    }

    fn created(path: impl Into<PathBuf>) -> RawEvent {
        RawEvent::FileSystem(FileSystemEvent::new(FsEventKind::Created, path))
    }

    #[test]
    fn protected_clipboard_is_cleared_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clipboard = MockClipboardAccess::new();
        clipboard.expect_clear().times(1).returning(|| Ok(()));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .with(eq(PROTECTION_TITLE), eq(CLIPBOARD_BLOCKED))
            .times(1)
            .return_const(());
        let enforcer = enforcer(tmp.path(), clipboard, notifier);

        let snapshot: ClipboardSnapshot =
            [PathBuf::from("/elsewhere/a"), tmp.path().join("secret.txt")]
                .into_iter()
                .collect();
        let outcome = enforcer.handle(RawEvent::ClipboardChanged(Some(snapshot)));

        assert!(matches!(
            outcome,
            Outcome::Enforced(EnforcementAction::ClearClipboard)
        ));
    }

    #[test]
    fn outside_clipboard_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clipboard = MockClipboardAccess::new();
        clipboard.expect_clear().never();
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();
        let enforcer = enforcer(&tmp.path().join("root"), clipboard, notifier);

        let snapshot: ClipboardSnapshot = [tmp.path().join("root2").join("f.txt")]
            .into_iter()
            .collect();

        assert!(matches!(
            enforcer.handle(RawEvent::ClipboardChanged(Some(snapshot))),
            Outcome::NoAction
        ));
    }

    #[test]
    fn own_clear_does_not_notify_again() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clipboard = MockClipboardAccess::new();
        clipboard.expect_clear().times(1).returning(|| Ok(()));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).return_const(());
        let enforcer = enforcer(tmp.path(), clipboard, notifier);

        let snapshot: ClipboardSnapshot = [tmp.path().join("a")].into_iter().collect();
        enforcer.handle(RawEvent::ClipboardChanged(Some(snapshot)));
        // The clear arrives as a change with no file list.
        let echo = enforcer.handle(RawEvent::ClipboardChanged(None));
        let empty = enforcer.handle(RawEvent::ClipboardChanged(Some(ClipboardSnapshot::default())));

        assert!(matches!(echo, Outcome::NoAction));
        assert!(matches!(empty, Outcome::NoAction));
        assert!(!enforcer.self_clear_pending.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_clear_reports_once_and_resets_suppression() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clipboard = MockClipboardAccess::new();
        clipboard
            .expect_clear()
            .times(1)
            .returning(|| Err(ClipboardError::Clear("locked".into())));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|title, message| {
                title == FAILURE_TITLE && message.starts_with("Failed to enforce protection:")
            })
            .times(1)
            .return_const(());
        let enforcer = enforcer(tmp.path(), clipboard, notifier);

        let snapshot: ClipboardSnapshot = [tmp.path().join("a")].into_iter().collect();
        let outcome = enforcer.handle(RawEvent::ClipboardChanged(Some(snapshot)));

        assert!(matches!(outcome, Outcome::Failed(EnforcementError::Clipboard(_))));
        assert!(!enforcer.self_clear_pending.load(Ordering::SeqCst));
    }

    #[test]
    fn created_file_is_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("dropped.txt");
        fs::write(&file, "x").unwrap();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .with(eq(PROTECTION_TITLE), eq(CREATION_BLOCKED))
            .times(1)
            .return_const(());
        let enforcer = enforcer(tmp.path(), MockClipboardAccess::new(), notifier);

        let outcome = enforcer.handle(created(file.clone()));

        assert!(matches!(outcome, Outcome::Enforced(EnforcementAction::DeleteFile(_))));
        assert!(!file.exists());
    }

    #[test]
    fn created_directory_is_removed_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bundle");
        fs::create_dir_all(dir.join("inner")).unwrap();
        fs::write(dir.join("inner").join("f"), "x").unwrap();
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).return_const(());
        let enforcer = enforcer(tmp.path(), MockClipboardAccess::new(), notifier);

        enforcer.handle(created(dir.clone()));

        assert!(!dir.exists());
        assert!(tmp.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_delete_reports_and_processing_continues() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("plain.txt"), "x").unwrap();
        let survivor = tmp.path().join("second.txt");
        fs::write(&survivor, "x").unwrap();
        let mut notifier = MockNotifier::new();
        let mut seq = mockall::Sequence::new();
        notifier
            .expect_notify()
            .withf(|title, message| {
                title == FAILURE_TITLE && message.starts_with("Failed to enforce protection:")
            })
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        notifier
            .expect_notify()
            .withf(|title, _| title == PROTECTION_TITLE)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        let enforcer = enforcer(tmp.path(), MockClipboardAccess::new(), notifier);

        // A regular file cannot have children: ENOTDIR, whatever the privileges.
        let first = enforcer.handle(created(tmp.path().join("plain.txt").join("child")));
        let second = enforcer.handle(created(survivor.clone()));

        assert!(matches!(first, Outcome::Failed(EnforcementError::Delete { .. })));
        assert!(matches!(second, Outcome::Enforced(_)));
        assert!(!survivor.exists());
    }

    #[test]
    fn vanished_entry_is_ignored_without_notice() {
        let tmp = tempfile::tempdir().unwrap();
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();
        let enforcer = enforcer(tmp.path(), MockClipboardAccess::new(), notifier);

        let outcome = enforcer.handle(created(tmp.path().join("gone.txt")));

        assert!(matches!(outcome, Outcome::NoAction));
    }

    #[test]
    fn non_creation_events_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();
        let enforcer = enforcer(tmp.path(), MockClipboardAccess::new(), notifier);
        let inside = tmp.path().join("a.txt");

        for kind in [FsEventKind::Deleted, FsEventKind::Changed, FsEventKind::Renamed] {
            let event = RawEvent::FileSystem(FileSystemEvent::new(kind, inside.clone()));
            assert!(matches!(enforcer.handle(event), Outcome::NoAction));
        }
        assert!(matches!(
            enforcer.handle(created(tmp.path().to_path_buf())),
            Outcome::NoAction
        ));
    }

    #[test]
    fn custom_title_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, "x").unwrap();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .with(eq("Vault"), eq(CREATION_BLOCKED))
            .times(1)
            .return_const(());
        let enforcer =
            enforcer(tmp.path(), MockClipboardAccess::new(), notifier).with_title("Vault");

        enforcer.handle(created(file));
    }

    #[test]
    fn children_of_removed_directory_are_ignored_quietly() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bundle");
        fs::create_dir_all(dir.join("inner")).unwrap();
        fs::write(dir.join("inner").join("a"), "x").unwrap();
        fs::write(dir.join("inner").join("b"), "x").unwrap();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .with(eq(PROTECTION_TITLE), eq(CREATION_BLOCKED))
            .times(1)
            .return_const(());
        let enforcer = enforcer(tmp.path(), MockClipboardAccess::new(), notifier);

        enforcer.handle(created(dir.clone()));
        let late = [
            enforcer.handle(created(dir.join("inner"))),
            enforcer.handle(created(dir.join("inner").join("a"))),
            enforcer.handle(created(dir.join("inner").join("b"))),
        ];

        assert!(late.iter().all(|o| matches!(o, Outcome::NoAction)));
        assert!(!dir.exists());
    }

    #[test]
    fn rename_from_outside_counts_as_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("vault");
        fs::create_dir_all(&root).unwrap();
        let moved = root.join("moved-in.txt");
        fs::write(&moved, "x").unwrap();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .with(eq(PROTECTION_TITLE), eq(CREATION_BLOCKED))
            .times(1)
            .return_const(());
        let enforcer = enforcer(&root, MockClipboardAccess::new(), notifier);

        let inside = RawEvent::FileSystem(FileSystemEvent::renamed(root.join("a"), &moved));
        assert!(matches!(enforcer.handle(inside), Outcome::NoAction));

        let outside = RawEvent::FileSystem(FileSystemEvent::renamed(
            tmp.path().join("outside.txt"),
            &moved,
        ));
        assert!(matches!(
            enforcer.handle(outside),
            Outcome::Enforced(EnforcementAction::DeleteFile(_))
        ));
        assert!(!moved.exists());
    }

    #[test]
    fn file_list_signal_leaves_self_clear_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clipboard = MockClipboardAccess::new();
        clipboard.expect_clear().times(1).returning(|| Ok(()));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).return_const(());
        let enforcer = enforcer(&tmp.path().join("root"), clipboard, notifier);

        let protected: ClipboardSnapshot =
            [tmp.path().join("root").join("a")].into_iter().collect();
        enforcer.handle(RawEvent::ClipboardChanged(Some(protected)));
        assert!(enforcer.self_clear_pending.load(Ordering::SeqCst));

        // A user copy lands before our clear is observed.
        let unrelated: ClipboardSnapshot = [tmp.path().join("elsewhere")].into_iter().collect();
        assert!(matches!(
            enforcer.handle(RawEvent::ClipboardChanged(Some(unrelated))),
            Outcome::NoAction
        ));
        assert!(enforcer.self_clear_pending.load(Ordering::SeqCst));

        enforcer.handle(RawEvent::ClipboardChanged(None));
        assert!(!enforcer.self_clear_pending.load(Ordering::SeqCst));
    }
}
