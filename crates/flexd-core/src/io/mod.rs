//! Binary-format extraction and transport.

pub mod ar;
pub mod compression;
pub mod cpio;
pub mod fetch;
pub mod rpm;
pub mod safe_path;
pub mod tar_zip;

use std::path::Path;

use crate::error::Result;

/// Archive formats the engine knows how to extract, keyed by the
/// `source.type` values a manifest can declare (minus `url` and `file`,
/// which need no extraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    Zip,
    Rpm,
    Deb,
}

/// Dispatch to the extractor matching `format`.
pub fn extract(format: ArchiveFormat, archive_path: &Path, base: &Path) -> Result<()> {
    match format {
        ArchiveFormat::Tar => tar_zip::extract_tar(archive_path, base),
        ArchiveFormat::Zip => tar_zip::extract_zip(archive_path, base),
        ArchiveFormat::Rpm => rpm::extract_rpm(archive_path, base),
        ArchiveFormat::Deb => ar::extract_deb(archive_path, base),
    }
}
