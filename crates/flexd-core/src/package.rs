//! The polymorphic package abstraction: `Package = Source | SystemdUnit | EtcOverlay`.
//!
//! All three variants share one capability set — `kind`, `name`, `version`,
//! `sources`, `install`, `etc_files` — so the store manager can install and
//! fingerprint them uniformly. The kind discriminator is folded into every
//! fingerprint so that, say, a source package and a systemd-unit package
//! that happen to share a name never collide on state directory name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::etc_overlay;
use crate::fingerprint::Fingerprint;
use crate::io::{self, fetch::Fetcher, ArchiveFormat};
use crate::manifest::{EtcFileEntry, SourceDef, UnitDef};
use crate::template::{self, TemplateContext};

/// Shared services available to every package during `install`. `cancel` is
/// observed at HTTP request boundaries inside the fetcher; installing code
/// never needs to poll it directly.
pub struct InstallContext<'a> {
    pub fetcher: &'a Fetcher,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone)]
pub struct SourcePackage {
    pub name: String,
    pub version: String,
    pub source: SourceDef,
    pub etc_files: Vec<EtcFileEntry>,
}

/// A unit package's dependency, resolved to its already-installed state
/// directory by the time the unit is installed.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub name: String,
    pub kind: &'static str,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SystemdUnitPackage {
    pub name: String,
    pub version: String,
    pub template_text: String,
    pub dependencies: Vec<ResolvedDependency>,
}

/// One already-installed package, paired with its final absolute state
/// directory.
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub package: Package,
    pub state_dir: PathBuf,
}

impl InstalledPackage {
    /// `[<state>/bin]` if that subdirectory exists, else empty.
    pub fn bin_paths(&self) -> Vec<PathBuf> {
        let bin = self.state_dir.join("bin");
        if bin.is_dir() {
            vec![bin]
        } else {
            Vec::new()
        }
    }

    pub fn fingerprint_ref(&self) -> String {
        format!("{}://{}", self.package.kind(), self.package.name())
    }
}

#[derive(Debug, Clone)]
pub enum Package {
    Source(SourcePackage),
    SystemdUnit(SystemdUnitPackage),
    EtcOverlay(etc_overlay::EtcOverlayPackage),
}

impl Package {
    pub fn kind(&self) -> &'static str {
        match self {
            Package::Source(_) => "source",
            Package::SystemdUnit(_) => "systemd-unit",
            Package::EtcOverlay(_) => "etc-overlay",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Package::Source(p) => &p.name,
            Package::SystemdUnit(p) => &p.name,
            Package::EtcOverlay(p) => &p.name,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Package::Source(p) => &p.version,
            Package::SystemdUnit(p) => &p.version,
            Package::EtcOverlay(p) => &p.version,
        }
    }

    /// Fingerprint inputs, in the exact order the fingerprint hashes them.
    pub fn fingerprint_inputs(&self) -> Vec<String> {
        let mut inputs = vec![self.kind().to_string(), self.name().to_string(), self.version().to_string()];
        match self {
            Package::Source(p) => {
                inputs.push(p.source.fingerprint_input());
                for entry in &p.etc_files {
                    inputs.push(format!("{}->{}", entry.source, entry.target));
                }
            }
            Package::SystemdUnit(p) => {
                let mut refs: Vec<String> = p
                    .dependencies
                    .iter()
                    .map(|d| format!("{}://{}", d.kind, d.name))
                    .collect();
                refs.sort();
                inputs.extend(refs);
                inputs.push(format!("{}.service->systemd/system/{}.service", p.name, p.name));
            }
            Package::EtcOverlay(p) => {
                let mut refs = p.other_package_refs.clone();
                refs.sort();
                inputs.extend(refs);
            }
        }
        inputs
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self.fingerprint_inputs())
    }

    pub fn etc_files(&self) -> Vec<EtcFileEntry> {
        match self {
            Package::Source(p) => p.etc_files.clone(),
            Package::SystemdUnit(p) => vec![EtcFileEntry {
                source: format!("{}.service", p.name),
                target: format!("systemd/system/{}.service", p.name),
            }],
            Package::EtcOverlay(_) => Vec::new(),
        }
    }

    pub fn sources(&self) -> Vec<String> {
        match self {
            Package::Source(p) => vec![p.source.fingerprint_input()],
            Package::SystemdUnit(p) => {
                let mut refs: Vec<String> = p
                    .dependencies
                    .iter()
                    .map(|d| format!("{}://{}", d.kind, d.name))
                    .collect();
                refs.sort();
                refs
            }
            Package::EtcOverlay(p) => {
                let mut refs = p.other_package_refs.clone();
                refs.sort();
                refs
            }
        }
    }

    /// Populate `base` with the package's complete content. Idempotent when
    /// invoked against an empty base.
    pub async fn install(&self, ctx: &InstallContext<'_>, base: &Path) -> Result<()> {
        match self {
            Package::Source(p) => install_source(p, ctx, base).await,
            Package::SystemdUnit(p) => install_systemd_unit(p, base),
            Package::EtcOverlay(p) => etc_overlay::install(p, base),
        }
    }
}

async fn install_source(pkg: &SourcePackage, ctx: &InstallContext<'_>, base: &Path) -> Result<()> {
    match &pkg.source {
        SourceDef::Url { uri } => {
            std::fs::create_dir_all(base)?;
            let file_name = uri
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| EngineError::InvalidManifest(format!("cannot derive file name from uri {uri}")))?;
            ctx.fetcher.fetch_url(uri, &base.join(file_name), ctx.cancel).await
        }
        SourceDef::UrlTar { uri } => fetch_and_extract(ctx, uri, base, ArchiveFormat::Tar, "archive.tar").await,
        SourceDef::UrlZip { uri } => fetch_and_extract(ctx, uri, base, ArchiveFormat::Zip, "archive.zip").await,
        SourceDef::UrlRpm { uri } => fetch_and_extract(ctx, uri, base, ArchiveFormat::Rpm, "archive.rpm").await,
        SourceDef::UrlDeb { uri } => fetch_and_extract(ctx, uri, base, ArchiveFormat::Deb, "archive.deb").await,
        SourceDef::File { uri } => crate::io::fetch::copy_file_source(Path::new(uri), base),
    }
}

async fn fetch_and_extract(
    ctx: &InstallContext<'_>,
    uri: &str,
    base: &Path,
    format: ArchiveFormat,
    scratch_name: &str,
) -> Result<()> {
    std::fs::create_dir_all(base)?;
    let scratch_dir = tempfile::Builder::new().prefix("flexd-fetch-").tempdir()?;
    let archive_path = scratch_dir.path().join(scratch_name);
    ctx.fetcher.fetch_url(uri, &archive_path, ctx.cancel).await?;
    io::extract(format, &archive_path, base)
}

fn install_systemd_unit(pkg: &SystemdUnitPackage, base: &Path) -> Result<()> {
    let mut states: BTreeMap<String, &Path> = BTreeMap::new();
    for dep in &pkg.dependencies {
        states.insert(dep.name.clone(), dep.state_dir.as_path());
    }
    let ctx = TemplateContext {
        package_states: &states,
    };
    let rendered = template::render(&pkg.template_text, &ctx)?;

    std::fs::create_dir_all(base)?;
    let dest = base.join(format!("{}.service", pkg.name));
    std::fs::write(&dest, rendered)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o644))?;
    }
    Ok(())
}
