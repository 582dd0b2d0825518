//! Atomic `/etc` overlay switching, leaf promotion, and stale-entry GC.
//!
//! All operations are confined to `<root_dir>/etc/`. The `static` symlink
//! is the sole ground truth for "which generation is live"; promoted
//! leaves are computed from the *direct* readlink of `static`, never its
//! full resolution, so a later replacement of `static` cannot silently
//! invalidate already-promoted links (see the cyclic-link design note).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct EtcManager {
    root_dir: PathBuf,
    store_states_dir: PathBuf,
}

impl EtcManager {
    pub fn new(root_dir: impl Into<PathBuf>, store_states_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            store_states_dir: store_states_dir.into(),
        }
    }

    fn etc_dir(&self) -> PathBuf {
        self.root_dir.join("etc")
    }

    fn static_link(&self) -> PathBuf {
        self.etc_dir().join("static")
    }

    /// The direct (unresolved) readlink of `<root_dir>/etc/static`, or
    /// `None` if it does not exist yet (first run).
    pub fn current_static_target(&self) -> Option<PathBuf> {
        std::fs::read_link(self.static_link()).ok()
    }

    /// Switch `static` to `source`, promote every leaf under it to a
    /// per-target `/etc` symlink, then garbage-collect stale store-owned
    /// symlinks left over from the previous generation.
    pub fn apply(&self, source: &Path) -> Result<()> {
        std::fs::create_dir_all(self.etc_dir())?;
        self.switch_static(source)?;

        let direct_target = self
            .current_static_target()
            .expect("static was just written by switch_static");
        let resolved = std::fs::canonicalize(self.static_link())?;

        let (promoted, obstructions) = self.promote(&resolved, &direct_target)?;
        self.gc(&promoted)?;

        if !obstructions.is_empty() {
            return Err(crate::error::EngineError::EtcNonSymlinkObstruction(obstructions));
        }
        Ok(())
    }

    fn switch_static(&self, source: &Path) -> Result<()> {
        let etc_dir = self.etc_dir();
        let tmp_name = format!(".static-tmp-{}", std::process::id());
        let tmp_path = etc_dir.join(&tmp_name);
        let _ = std::fs::remove_file(&tmp_path);
        #[cfg(unix)]
        std::os::unix::fs::symlink(source, &tmp_path)?;
        std::fs::rename(&tmp_path, self.static_link())?;
        Ok(())
    }

    /// Walk `resolved` depth-first, visiting only leaves, and promote each
    /// to `<root_dir>/etc/<rel>` pointing at `<direct_target>/<rel>`.
    /// Returns the set of relative paths promoted this round and the list
    /// of relative paths where a non-symlink obstruction was found.
    fn promote(&self, resolved: &Path, direct_target: &Path) -> Result<(HashSet<String>, Vec<String>)> {
        let mut promoted = HashSet::new();
        let mut obstructions = Vec::new();

        for entry in walkdir::WalkDir::new(resolved).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(resolved)
                .expect("walkdir entries are under resolved")
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");

            let desired_target = direct_target.join(&rel);
            let etc_path = self.etc_dir().join(&rel);

            if etc_path.is_symlink() {
                if std::fs::read_link(&etc_path).ok().as_deref() == Some(desired_target.as_path()) {
                    promoted.insert(rel);
                    continue;
                }
            } else if etc_path.exists() {
                obstructions.push(rel);
                continue;
            }

            if let Some(parent) = etc_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp_name = format!(".{}.tmp-{}", entry.file_name().to_string_lossy(), std::process::id());
            let tmp_path = etc_path.parent().unwrap_or(&self.etc_dir()).join(&tmp_name);
            let _ = std::fs::remove_file(&tmp_path);
            #[cfg(unix)]
            std::os::unix::fs::symlink(&desired_target, &tmp_path)?;
            std::fs::rename(&tmp_path, &etc_path)?;
            promoted.insert(rel);
        }
        Ok((promoted, obstructions))
    }

    /// Remove store-owned symlinks under `<root_dir>/etc/` whose
    /// relative-to-etc path is not in `promoted`, then remove any parent
    /// directories left empty by that removal.
    fn gc(&self, promoted: &HashSet<String>) -> Result<()> {
        let etc_dir = self.etc_dir();
        let mut to_remove = Vec::new();

        for entry in walkdir::WalkDir::new(&etc_dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.path() == self.static_link() {
                continue;
            }
            if !entry.file_type().is_symlink() {
                continue;
            }
            let Ok(link_dest) = std::fs::read_link(entry.path()) else {
                continue;
            };
            if !link_dest.starts_with(&self.store_states_dir) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&etc_dir)
                .expect("walkdir entries are under etc_dir")
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            if !promoted.contains(&rel) {
                to_remove.push(entry.path().to_path_buf());
            }
        }

        for path in &to_remove {
            if std::fs::remove_file(path).is_ok() {
                self.remove_empty_parents(path);
            }
        }
        Ok(())
    }

    fn remove_empty_parents(&self, removed: &Path) {
        let etc_dir = self.etc_dir();
        let mut current = removed.parent().map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == etc_dir || !dir.starts_with(&etc_dir) {
                break;
            }
            match std::fs::read_dir(&dir) {
                Ok(mut entries) => {
                    if entries.next().is_some() {
                        break;
                    }
                }
                Err(_) => break,
            }
            if std::fs::remove_dir(&dir).is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_overlay_etc(root: &Path, states_dir: &Path, fp: &str, files: &[(&str, &str)]) -> PathBuf {
        let state = states_dir.join(format!("etc-{fp}"));
        let etc = state.join("etc");
        for (target, content) in files {
            let target_pkg_dir = states_dir.join(format!("pkg-{target}-{fp}"));
            std::fs::create_dir_all(&target_pkg_dir).unwrap();
            std::fs::write(target_pkg_dir.join("file"), content).unwrap();
            let link_path = etc.join(target);
            std::fs::create_dir_all(link_path.parent().unwrap()).unwrap();
            #[cfg(unix)]
            std::os::unix::fs::symlink(target_pkg_dir.join("file"), &link_path).unwrap();
        }
        let _ = root;
        etc
    }

    #[test]
    fn first_apply_promotes_all_leaves() {
        let dir = tempdir().unwrap();
        let root_dir = dir.path().join("etcroot");
        let states_dir = dir.path().join("states");
        std::fs::create_dir_all(&states_dir).unwrap();

        let overlay_etc = make_overlay_etc(&root_dir, &states_dir, "fp1", &[("containerd/config.toml", "hi")]);
        let mgr = EtcManager::new(&root_dir, &states_dir);
        mgr.apply(&overlay_etc).unwrap();

        let promoted = root_dir.join("etc/containerd/config.toml");
        assert!(promoted.is_symlink());
        assert_eq!(std::fs::read(&promoted).unwrap(), b"hi");
        assert!(root_dir.join("etc/static").is_symlink());
    }

    #[test]
    fn second_apply_gcs_stale_entries_and_empty_parents() {
        let dir = tempdir().unwrap();
        let root_dir = dir.path().join("etcroot");
        let states_dir = dir.path().join("states");
        std::fs::create_dir_all(&states_dir).unwrap();
        let mgr = EtcManager::new(&root_dir, &states_dir);

        let gen1 = make_overlay_etc(&root_dir, &states_dir, "fp1", &[("systemd/system/kubelet.service", "a")]);
        mgr.apply(&gen1).unwrap();
        assert!(root_dir.join("etc/systemd/system/kubelet.service").exists());

        let gen2 = make_overlay_etc(&root_dir, &states_dir, "fp2", &[("systemd/system/calico.service", "b")]);
        mgr.apply(&gen2).unwrap();

        assert!(!root_dir.join("etc/systemd/system/kubelet.service").exists());
        assert!(!root_dir.join("etc/systemd").exists());
        assert!(root_dir.join("etc/systemd/system/calico.service").exists());
    }

    #[test]
    fn non_symlink_obstruction_is_skipped_not_overwritten() {
        let dir = tempdir().unwrap();
        let root_dir = dir.path().join("etcroot");
        let states_dir = dir.path().join("states");
        std::fs::create_dir_all(&states_dir).unwrap();
        std::fs::create_dir_all(root_dir.join("etc/containerd")).unwrap();
        std::fs::write(root_dir.join("etc/containerd/config.toml"), "user-owned").unwrap();

        let overlay_etc = make_overlay_etc(&root_dir, &states_dir, "fp1", &[("containerd/config.toml", "engine")]);
        let mgr = EtcManager::new(&root_dir, &states_dir);
        let err = mgr.apply(&overlay_etc).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::EtcNonSymlinkObstruction(_)));
        assert_eq!(
            std::fs::read_to_string(root_dir.join("etc/containerd/config.toml")).unwrap(),
            "user-owned"
        );
    }

    #[test]
    fn current_static_target_is_none_before_first_apply() {
        let dir = tempdir().unwrap();
        let mgr = EtcManager::new(dir.path().join("etcroot"), dir.path().join("states"));
        assert_eq!(mgr.current_static_target(), None);
    }
}
