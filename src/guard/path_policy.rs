//! Protected-root membership test.
//!
//! Paths are compared lexically after normalization: made absolute, `.`
//! dropped, `..` resolved (it can never climb above the filesystem root),
//! and Windows verbatim prefixes (`\\?\C:\`, `\\?\UNC\srv\share`) folded to
//! their plain forms. Comparison is per component, so `C:\Data2` is never
//! inside `C:\Data`. On case-insensitive platforms components are compared
//! case-folded.
//!
//! Candidates are not resolved through symlinks. A [`ProtectedRoot`] keeps
//! both the spelling it was configured with and its canonical location, and
//! a candidate under either one is protected.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf, Prefix};

use crate::error::GuardError;

/// Whether path comparison ignores case on this platform.
pub const CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

/// The directory tree under the one-way policy.
///
/// Immutable once prepared. Cloned into each channel; all clones refer to
/// the same normalized path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRoot {
    /// Canonical location; this is what gets watched.
    path: PathBuf,
    key: Vec<String>,
    /// Key of the configured spelling when it differs from the canonical
    /// one (symlink, junction, `subst` or mapped drive).
    alias: Option<Vec<String>>,
}

impl ProtectedRoot {
    /// Create the directory if missing and pin its canonical location.
    pub fn prepare(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let requested = path.as_ref();
        let root_error = |source| GuardError::Root {
            path: requested.to_path_buf(),
            source,
        };

        fs::create_dir_all(requested).map_err(root_error)?;
        let canonical = requested.canonicalize().map_err(root_error)?;
        if !canonical.is_dir() {
            return Err(root_error(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                "protected root is not a directory",
            )));
        }

        Ok(Self::with_alias(&canonical, requested))
    }

    /// Like [`prepare`](Self::prepare) but never creates anything. A root
    /// that does not exist yet is taken as spelled.
    pub fn resolve(path: impl AsRef<Path>) -> Self {
        let requested = path.as_ref();
        match requested.canonicalize() {
            Ok(canonical) => Self::with_alias(&canonical, requested),
            Err(_) => Self::new_unchecked(requested),
        }
    }

    /// Build a root without touching the filesystem.
    pub fn new_unchecked(path: impl AsRef<Path>) -> Self {
        let path = normalize(path.as_ref());
        let key = comparison_key(&path);
        Self {
            path,
            key,
            alias: None,
        }
    }

    fn with_alias(canonical: &Path, requested: &Path) -> Self {
        let mut root = Self::new_unchecked(canonical);
        let alias = comparison_key(&normalize(requested));
        if alias != root.key {
            root.alias = Some(alias);
        }
        root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff `candidate` is the root itself or lies beneath it.
    pub fn contains(&self, candidate: &Path) -> bool {
        let key = comparison_key(&normalize(candidate));
        self.keys().any(|root| key.starts_with(root))
    }

    /// True iff `candidate` normalizes to the root directory itself.
    pub fn is_root(&self, candidate: &Path) -> bool {
        let key = comparison_key(&normalize(candidate));
        self.keys().any(|root| key == *root)
    }

    fn keys(&self) -> impl Iterator<Item = &Vec<String>> {
        std::iter::once(&self.key).chain(self.alias.as_ref())
    }
}

/// Decide whether `candidate` equals or descends from `root`.
///
/// # Examples
///
/// ```
/// use copyguard::guard::is_protected;
/// use std::path::Path;
///
/// # #[cfg(unix)]
/// # {
/// assert!(is_protected(Path::new("/srv/data/sub/f.txt"), Path::new("/srv/data")));
/// assert!(!is_protected(Path::new("/srv/data2/f.txt"), Path::new("/srv/data")));
/// # }
/// ```
pub fn is_protected(candidate: &Path, root: &Path) -> bool {
    let root_key = comparison_key(&normalize(root));
    comparison_key(&normalize(candidate)).starts_with(&root_key)
}

/// Lexically normalize a path to absolute form.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    };

    let mut prefix: Option<OsString> = None;
    let mut has_root = false;
    let mut segments: Vec<OsString> = Vec::new();

    for component in absolute.components() {
        match component {
            Component::Prefix(p) => prefix = Some(fold_prefix(p.kind(), p.as_os_str())),
            Component::RootDir => has_root = true,
            Component::CurDir => {}
            Component::ParentDir => {
                segments.pop();
            }
            Component::Normal(segment) => segments.push(segment.to_os_string()),
        }
    }

    let mut out = PathBuf::new();
    if let Some(prefix) = prefix {
        out.push(prefix);
    }
    if has_root {
        out.push(std::path::MAIN_SEPARATOR_STR);
    }
    for segment in segments {
        out.push(segment);
    }
    out
}

fn fold_prefix(kind: Prefix<'_>, raw: &std::ffi::OsStr) -> OsString {
    match kind {
        Prefix::VerbatimDisk(letter) | Prefix::Disk(letter) => {
            OsString::from(format!("{}:", letter as char))
        }
        Prefix::VerbatimUNC(server, share) | Prefix::UNC(server, share) => {
            let mut unc = OsString::from(r"\\");
            unc.push(server);
            unc.push(r"\");
            unc.push(share);
            unc
        }
        _ => raw.to_os_string(),
    }
}

/// Per-component comparison key for an already-normalized path.
fn comparison_key(path: &Path) -> Vec<String> {
    path.components()
        .map(|component| {
            let text = match component {
                Component::RootDir => std::path::MAIN_SEPARATOR_STR.to_string(),
                other => other.as_os_str().to_string_lossy().into_owned(),
            };
            if CASE_INSENSITIVE {
                text.to_lowercase()
            } else {
                text
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn descendant_is_protected() {
        assert!(is_protected(
            Path::new("/srv/data/sub/f.txt"),
            Path::new("/srv/data")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn root_itself_is_protected() {
        assert!(is_protected(Path::new("/srv/data"), Path::new("/srv/data")));
        assert!(is_protected(Path::new("/srv/data/"), Path::new("/srv/data")));
    }

    #[cfg(unix)]
    #[test]
    fn sibling_with_shared_prefix_is_not_protected() {
        assert!(!is_protected(
            Path::new("/srv/data2/f.txt"),
            Path::new("/srv/data")
        ));
        assert!(!is_protected(Path::new("/srv/datafile"), Path::new("/srv/data")));
    }

    #[cfg(unix)]
    #[test]
    fn parent_of_root_is_not_protected() {
        assert!(!is_protected(Path::new("/srv"), Path::new("/srv/data")));
    }

    #[cfg(unix)]
    #[test]
    fn traversal_out_of_root_is_not_protected() {
        assert!(!is_protected(
            Path::new("/srv/data/../etc/passwd"),
            Path::new("/srv/data")
        ));
        assert!(!is_protected(
            Path::new("/srv/data/sub/../../data2/x"),
            Path::new("/srv/data")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn traversal_that_stays_inside_is_protected() {
        assert!(is_protected(
            Path::new("/srv/data/./sub/../f.txt"),
            Path::new("/srv/data")
        ));
        assert!(is_protected(
            Path::new("/srv/other/../data/f.txt"),
            Path::new("/srv/data")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn parent_dir_cannot_climb_above_filesystem_root() {
        assert_eq!(normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn relative_candidates_resolve_against_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert!(is_protected(Path::new("some/file.txt"), &cwd));
        assert!(!is_protected(Path::new("../outside.txt"), &cwd));
    }

    #[cfg(windows)]
    #[test]
    fn windows_segment_boundary() {
        assert!(!is_protected(
            Path::new(r"C:\Data2\f.txt"),
            Path::new(r"C:\Data")
        ));
        assert!(is_protected(
            Path::new(r"C:\Data\sub\f.txt"),
            Path::new(r"C:\Data")
        ));
    }

    #[cfg(windows)]
    #[test]
    fn windows_comparison_ignores_case_and_verbatim_prefix() {
        assert!(is_protected(
            Path::new(r"c:\data\SUB\f.txt"),
            Path::new(r"C:\Data")
        ));
        assert!(is_protected(
            Path::new(r"C:\Data\f.txt"),
            Path::new(r"\\?\C:\Data")
        ));
        assert!(is_protected(
            Path::new(r"\\?\UNC\server\share\dir\f.txt"),
            Path::new(r"\\server\share\dir")
        ));
    }

    #[test]
    fn prepare_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let wanted = tmp.path().join("vault").join("nested");

        let root = ProtectedRoot::prepare(&wanted).unwrap();

        assert!(wanted.is_dir());
        assert!(root.contains(&root.path().join("a.txt")));
        assert!(root.is_root(root.path()));
        assert!(!root.contains(tmp.path()));
    }

    #[test]
    fn prepare_rejects_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        let err = ProtectedRoot::prepare(&file).unwrap_err();
        assert!(matches!(err, GuardError::Root { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn root_reached_through_symlink_matches_both_spellings() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("data").join("vault");
        fs::create_dir_all(&real).unwrap();
        let link = tmp.path().join("Vault");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let root = ProtectedRoot::prepare(&link).unwrap();

        assert_eq!(root.path(), normalize(&real.canonicalize().unwrap()));
        assert!(root.contains(&link.join("secret.txt")));
        assert!(root.contains(&real.canonicalize().unwrap().join("secret.txt")));
        assert!(root.is_root(&link));
        assert!(!root.contains(&tmp.path().join("data").join("other.txt")));
    }

    #[test]
    fn resolve_does_not_create_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        let wanted = tmp.path().join("later");

        let root = ProtectedRoot::resolve(&wanted);

        assert!(!wanted.exists());
        assert!(root.contains(&wanted.join("f.txt")));
    }
}
