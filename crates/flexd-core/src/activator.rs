//! The activation pipeline: install every package for one manifest
//! generation, promote its `/etc` tree, and bring systemd in line with it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::etc_manager::EtcManager;
use crate::io::fetch::Fetcher;
use crate::manifest::Manifest;
use crate::package::{InstallContext, InstalledPackage, Package, ResolvedDependency, SystemdUnitPackage, SourcePackage};
use crate::store::Store;
use crate::systemd::{self, Deltas, SystemdManager};
use crate::template::{self, TemplateContext};

pub struct Activator {
    pub store: Store,
    pub etc_manager: EtcManager,
    pub fetcher: Fetcher,
    pub systemd: Arc<dyn SystemdManager>,
}

impl Activator {
    pub fn new(store: Store, etc_manager: EtcManager, fetcher: Fetcher, systemd: Arc<dyn SystemdManager>) -> Self {
        Self {
            store,
            etc_manager,
            fetcher,
            systemd,
        }
    }

    /// Run the full ordered pipeline for one manifest generation, returning
    /// the systemd deltas that were applied.
    ///
    /// `cancel` is observed between package installs and at every HTTP
    /// request boundary inside the fetcher; once the `/etc` overlay has been
    /// promoted, the systemd step runs to completion regardless of
    /// cancellation, since partially applying the delta set would leave
    /// units in an inconsistent state relative to the just-promoted tree.
    pub async fn apply_manifest(&self, manifest: &Manifest, cancel: &CancellationToken) -> Result<Deltas> {
        let old_static = self.etc_manager.current_static_target();

        let ctx = InstallContext { fetcher: &self.fetcher, cancel };
        self.store.prepare(manifest)?;
        let overlay = self.prepare_packages(&ctx, manifest).await?;
        let etc_tree = overlay.state_dir.join("etc");

        self.etc_manager.apply(&etc_tree)?;

        let old_units = match &old_static {
            Some(old) => walk_units(&old.join("systemd/system"))?,
            None => BTreeMap::new(),
        };
        let new_units = walk_units(&etc_tree.join("systemd/system"))?;

        let deltas = systemd::compute_deltas(&old_units, &new_units);
        self.apply_deltas(&deltas).await?;
        Ok(deltas)
    }

    /// Compute the systemd deltas a manifest would produce without
    /// installing any package or touching `/etc` or systemd: package state
    /// directories are deterministic from their fingerprint, so unit
    /// templates can be rendered against the paths they *would* resolve to
    /// once installed.
    pub fn plan(&self, manifest: &Manifest) -> Result<Deltas> {
        let old_static = self.etc_manager.current_static_target();
        let old_units = match &old_static {
            Some(old) => walk_units(&old.join("systemd/system"))?,
            None => BTreeMap::new(),
        };
        let new_units = render_units_dry(&self.store, manifest)?;
        Ok(systemd::compute_deltas(&old_units, &new_units))
    }

    /// Install every source package, then every unit package, then the
    /// etc-overlay package, returning the overlay's `InstalledPackage`.
    async fn prepare_packages(&self, ctx: &InstallContext<'_>, manifest: &Manifest) -> Result<InstalledPackage> {
        let mut installed: Vec<InstalledPackage> = Vec::new();
        let mut source_states: BTreeMap<String, InstalledPackage> = BTreeMap::new();

        for (name, def) in &manifest.packages_by_name {
            let pkg = Package::Source(SourcePackage {
                name: name.clone(),
                version: def.version.clone(),
                source: def.source.clone(),
                etc_files: def.etc_files.clone(),
            });
            let ip = self.store.install_package(ctx, pkg).await?;
            source_states.insert(name.clone(), ip.clone());
            installed.push(ip);
        }

        for (name, def) in &manifest.units_by_name {
            let template_text = def.template_text()?;
            let mut dependencies = Vec::new();
            for pkg_name in &def.packages {
                let dep_state = source_states
                    .get(pkg_name)
                    .expect("manifest validation guarantees referenced packages exist");
                dependencies.push(ResolvedDependency {
                    name: pkg_name.clone(),
                    kind: "source",
                    state_dir: dep_state.state_dir.clone(),
                });
            }
            let pkg = Package::SystemdUnit(SystemdUnitPackage {
                name: name.clone(),
                version: def.version.clone(),
                template_text,
                dependencies,
            });
            let ip = self.store.install_package(ctx, pkg).await?;
            installed.push(ip);
        }

        let overlay_pkg = crate::etc_overlay::EtcOverlayPackage::build(&manifest.version, &installed);
        self.store.install_package(ctx, Package::EtcOverlay(overlay_pkg)).await
    }

    /// `stop -> daemon-reload -> start -> restart -> reload`, the fixed
    /// order prescribed for delta application. An error at any step aborts
    /// with earlier steps left in effect.
    async fn apply_deltas(&self, deltas: &Deltas) -> Result<()> {
        for unit in &deltas.to_stop {
            self.systemd.stop_unit(unit).await?;
        }
        self.systemd.reload_daemon().await?;
        for unit in &deltas.to_start {
            self.systemd.start_unit(unit).await?;
        }
        for unit in &deltas.to_restart {
            self.systemd.restart_unit(unit).await?;
        }
        for unit in &deltas.to_reload {
            self.systemd.reload_unit(unit).await?;
        }
        Ok(())
    }
}

/// Render every unit's template against the state-directory paths its
/// dependencies would occupy once installed, without performing any
/// installation I/O.
fn render_units_dry(store: &Store, manifest: &Manifest) -> Result<BTreeMap<String, String>> {
    let mut source_state_dirs: BTreeMap<String, std::path::PathBuf> = BTreeMap::new();
    for (name, def) in &manifest.packages_by_name {
        let pkg = Package::Source(SourcePackage {
            name: name.clone(),
            version: def.version.clone(),
            source: def.source.clone(),
            etc_files: def.etc_files.clone(),
        });
        let state_dir = store.states_dir().join(format!("{}-{}", pkg.name(), pkg.fingerprint()));
        source_state_dirs.insert(name.clone(), state_dir);
    }

    let mut new_units = BTreeMap::new();
    for (name, def) in &manifest.units_by_name {
        let template_text = def.template_text()?;
        let mut states: BTreeMap<String, &Path> = BTreeMap::new();
        for pkg_name in &def.packages {
            let dir = source_state_dirs
                .get(pkg_name)
                .expect("manifest validation guarantees referenced packages exist");
            states.insert(pkg_name.clone(), dir.as_path());
        }
        let ctx = TemplateContext { package_states: &states };
        let rendered = template::render(&template_text, &ctx)?;
        new_units.insert(format!("{name}.service"), rendered);
    }
    Ok(new_units)
}

/// Walk `dir` (which may not exist, e.g. an empty `old_static`), following
/// symlinks, and collect the final text of every unit file it contains.
fn walk_units(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut units = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(units);
    }
    for entry in walkdir::WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !systemd::is_unit_file(&name) {
            continue;
        }
        let text = std::fs::read_to_string(entry.path())?;
        units.insert(name, text);
    }
    Ok(units)
}
