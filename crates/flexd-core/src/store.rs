//! Content-addressed package store: manifest history plus
//! fingerprint-cached, atomically-installed state directories.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::manifest::Manifest;
use crate::package::{InstallContext, InstalledPackage, Package};

const DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn states_dir(&self) -> PathBuf {
        self.root.join("states")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    /// Create `<root>`, `<root>/configs`, `<root>/states` with mode
    /// `0o755` and persist the manifest as indented JSON to
    /// `<root>/configs/<version>.json`, overwriting any prior file of the
    /// same name.
    pub fn prepare(&self, manifest: &Manifest) -> Result<()> {
        manifest.validate()?;
        for dir in [&self.root, &self.configs_dir(), &self.states_dir()] {
            std::fs::create_dir_all(dir)?;
            set_dir_mode(dir)?;
        }
        let config_path = self.configs_dir().join(format!("{}.json", manifest.version));
        let json = manifest.to_pretty_json()?;
        std::fs::write(&config_path, json)?;
        Ok(())
    }

    /// Install `pkg`, returning its final state directory. A state
    /// directory that already exists is returned immediately (cache hit);
    /// otherwise the package is installed into a fresh temp directory under
    /// `<root>/states/` and atomically renamed into place.
    ///
    /// Checked against `ctx.cancel` before any work starts, so cancellation
    /// requested between two package installs is observed before the next
    /// one begins rather than only mid-fetch.
    pub async fn install_package(&self, ctx: &InstallContext<'_>, pkg: Package) -> Result<InstalledPackage> {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let fingerprint = pkg.fingerprint();
        let state_dir = self.states_dir().join(format!("{}-{}", pkg.name(), fingerprint));

        if state_dir.is_dir() {
            tracing::debug!(package = pkg.name(), %fingerprint, "cache hit");
            return Ok(InstalledPackage { package: pkg, state_dir });
        }

        std::fs::create_dir_all(self.states_dir())?;
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{}-tmp-", pkg.name()))
            .tempdir_in(self.states_dir())?
            .into_path();

        if let Err(err) = pkg.install(ctx, &tmp).await {
            let _ = std::fs::remove_dir_all(&tmp);
            return Err(err);
        }

        if let Err(err) = std::fs::rename(&tmp, &state_dir) {
            let _ = std::fs::remove_dir_all(&tmp);
            return Err(err.into());
        }

        tracing::info!(package = pkg.name(), %fingerprint, state_dir = %state_dir.display(), "installed");
        Ok(InstalledPackage { package: pkg, state_dir })
    }
}

#[cfg(unix)]
fn set_dir_mode(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(DIR_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode(_dir: &Path) -> Result<()> {
    Ok(())
}
