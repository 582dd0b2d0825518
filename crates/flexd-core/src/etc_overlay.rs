//! The etc-overlay package: aggregates every other installed package's
//! declared `/etc` contributions into one symlink tree.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::package::InstalledPackage;

/// One package's single declared `/etc` contribution, flattened out of
/// `InstalledPackage::package.etc_files()` at overlay-build time.
#[derive(Debug, Clone)]
pub struct EtcOverlayEntry {
    pub owning_package: String,
    pub source: String,
    pub target: String,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EtcOverlayPackage {
    pub name: String,
    pub version: String,
    /// sorted `<kind>://<name>` list of every other installed package;
    /// precomputed fingerprint input.
    pub other_package_refs: Vec<String>,
    pub entries: Vec<EtcOverlayEntry>,
}

impl EtcOverlayPackage {
    /// Build the overlay package from every other installed package in the
    /// manifest. Does no I/O; conflict detection and materialization happen
    /// in `install`.
    pub fn build(version: &str, installed: &[InstalledPackage]) -> Self {
        let mut other_package_refs = Vec::new();
        let mut entries = Vec::new();
        for ip in installed {
            other_package_refs.push(ip.fingerprint_ref());
            for etc_file in ip.package.etc_files() {
                entries.push(EtcOverlayEntry {
                    owning_package: ip.package.name().to_string(),
                    source: etc_file.source,
                    target: etc_file.target,
                    state_dir: ip.state_dir.clone(),
                });
            }
        }
        Self {
            name: "etc".to_string(),
            version: version.to_string(),
            other_package_refs,
            entries,
        }
    }
}

/// Validate that `target` is a relative path with no leading separator and
/// no `..` components.
fn validate_target(target: &str) -> Result<()> {
    let path = Path::new(target);
    if path.is_absolute() {
        return Err(EngineError::InvalidManifest(format!(
            "etc target \"{target}\" must not be absolute"
        )));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(EngineError::InvalidManifest(format!(
                    "etc target \"{target}\" must not contain \"..\" or \".\" components"
                )))
            }
        }
    }
    Ok(())
}

/// `install(base)`: conflict-detection pass, then materialization. No I/O
/// occurs before the conflict check passes.
pub fn install(pkg: &EtcOverlayPackage, base: &Path) -> Result<()> {
    let mut by_target: HashMap<&str, &EtcOverlayEntry> = HashMap::new();
    for entry in &pkg.entries {
        validate_target(&entry.target)?;
        if let Some(existing) = by_target.get(entry.target.as_str()) {
            if existing.owning_package != entry.owning_package {
                return Err(EngineError::EtcTargetConflict {
                    target: entry.target.clone(),
                    first: existing.owning_package.clone(),
                    second: entry.owning_package.clone(),
                });
            }
        }
        by_target.insert(&entry.target, entry);
    }

    let etc_dir = base.join("etc");
    std::fs::create_dir_all(&etc_dir)?;
    for entry in &pkg.entries {
        let link_path = etc_dir.join(&entry.target);
        if let Some(parent) = link_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let link_target = entry.state_dir.join(&entry.source);
        #[cfg(unix)]
        std::os::unix::fs::symlink(&link_target, &link_path)?;
    }
    Ok(())
}
