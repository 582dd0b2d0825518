//! Path-traversal safety shared by every extractor.
//!
//! For every archive entry the extractor computes `target = join(base,
//! entry.name)`, then verifies that the cleaned `target` equals `base` or
//! begins with `base + separator`. The same check applies to symlink
//! link-name resolution: a symlink's resolved destination must also satisfy
//! it, or the entry is rejected.

use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// Lexically clean `path` (resolve `.`/`..` without touching the
/// filesystem; useful here because the target generally does not exist
/// yet, so `Path::canonicalize` cannot be used).
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join `base` and `entry_name`, verify the cleaned result stays under
/// `base`, and return it. `archive_label` and `entry_name` are only used to
/// build the error message.
pub fn safe_join(base: &Path, entry_name: &str, archive_label: &str) -> Result<PathBuf> {
    let joined = base.join(entry_name);
    let cleaned = clean(&joined);
    if cleaned == base || cleaned.starts_with(base) {
        Ok(cleaned)
    } else {
        Err(EngineError::PathTraversal {
            archive: archive_label.to_string(),
            entry: entry_name.to_string(),
            base: base.to_path_buf(),
        })
    }
}

/// Validate a symlink's link-name (the text stored in the symlink, which may
/// be relative) resolves to somewhere under `base` once joined against the
/// symlink's own parent directory.
pub fn safe_symlink_target(
    base: &Path,
    symlink_parent: &Path,
    link_name: &str,
    archive_label: &str,
) -> Result<PathBuf> {
    let joined = symlink_parent.join(link_name);
    let cleaned = clean(&joined);
    if cleaned == base || cleaned.starts_with(base) {
        Ok(cleaned)
    } else {
        Err(EngineError::PathTraversal {
            archive: archive_label.to_string(),
            entry: link_name.to_string(),
            base: base.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_entries_under_base() {
        let base = Path::new("/tmp/base");
        assert!(safe_join(base, "a/b/c.txt", "a.tar").is_ok());
    }

    #[test]
    fn rejects_parent_escape() {
        let base = Path::new("/tmp/base");
        assert!(safe_join(base, "../../etc/passwd", "a.tar").is_err());
    }

    #[test]
    fn rejects_absolute_escape_via_dotdot_collapse() {
        let base = Path::new("/tmp/base");
        assert!(safe_join(base, "a/../../b", "a.tar").is_err());
    }

    #[test]
    fn accepts_base_itself() {
        let base = Path::new("/tmp/base");
        assert!(safe_join(base, ".", "a.tar").is_ok());
    }

    #[test]
    fn rejects_symlink_escaping_base() {
        let base = Path::new("/tmp/base");
        let parent = Path::new("/tmp/base/sub");
        assert!(safe_symlink_target(base, parent, "../../../../etc/passwd", "a.cpio").is_err());
    }

    #[test]
    fn accepts_symlink_within_base() {
        let base = Path::new("/tmp/base");
        let parent = Path::new("/tmp/base/sub");
        assert!(safe_symlink_target(base, parent, "../other/file", "a.cpio").is_ok());
    }
}
