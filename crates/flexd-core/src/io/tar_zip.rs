//! Tar and zip extraction.

use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::io::compression;
use crate::io::safe_path::{safe_join, safe_symlink_target};

/// Extract a gzip/zstd/xz-framed tar archive at `archive_path` into `base`.
/// Entries of type regular-file, directory, and symlink are processed;
/// other entry types (hardlinks, devices, fifos) are skipped.
pub fn extract_tar(archive_path: &Path, base: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let buffered = BufReader::new(file);
    let decompressed = compression::detect_and_decompress(buffered, archive_path)?;
    extract_tar_stream(decompressed, archive_path, base)
}

/// Extract an already-decompressed tar byte stream. Shared by
/// [`extract_tar`] and the ar/deb and RPM extractors, whose inner tar/cpio
/// payloads arrive already peeled out of their outer container.
pub fn extract_tar_stream<R: Read>(reader: R, archive_path: &Path, base: &Path) -> Result<()> {
    let label = archive_path.display().to_string();
    let mut archive = tar::Archive::new(reader);

    for entry in archive
        .entries()
        .map_err(|e| corrupt(archive_path, e))?
    {
        let mut entry = entry.map_err(|e| corrupt(archive_path, e))?;
        let entry_path = entry
            .path()
            .map_err(|e| corrupt(archive_path, e))?
            .to_string_lossy()
            .into_owned();
        let target = safe_join(base, &entry_path, &label)?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&target)?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = fs::File::create(&target)?;
                std::io::copy(&mut entry, &mut out)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = entry.header().mode().unwrap_or(0o644);
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
                }
            }
            tar::EntryType::Symlink => {
                let link_name = entry
                    .link_name()
                    .map_err(|e| corrupt(archive_path, e))?
                    .ok_or_else(|| corrupt_msg(archive_path, "symlink entry missing link name"))?
                    .to_string_lossy()
                    .into_owned();
                let parent = target.parent().unwrap_or(base);
                safe_symlink_target(base, parent, &link_name, &label)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                #[cfg(unix)]
                std::os::unix::fs::symlink(&link_name, &target)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Extract a zip archive at `archive_path` into `base`. Directory entries
/// create directories; file entries are written with the archive's
/// recorded mode, masked to standard Unix permission bits.
pub fn extract_zip(archive_path: &Path, base: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let label = archive_path.display().to_string();
    let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(archive_path, e))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| corrupt(archive_path, e))?;
        let name = entry.name().to_string();
        let target = safe_join(base, &name, &label)?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|e| corrupt(archive_path, e))?;
        std::io::copy(&mut &buf[..], &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }
    Ok(())
}

fn corrupt(path: &Path, err: impl std::fmt::Display) -> EngineError {
    EngineError::CorruptArchive {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn corrupt_msg(path: &Path, msg: &str) -> EngineError {
    EngineError::CorruptArchive {
        path: path.to_path_buf(),
        message: msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_gz_tar(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> std::path::PathBuf {
        let archive_path = dir.join(name);
        let file = fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            let name_bytes = path.as_bytes();
            header.as_old_mut().name[..name_bytes.len()].copy_from_slice(name_bytes);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        archive_path
    }

    #[test]
    fn extracts_regular_files() {
        let dir = tempdir().unwrap();
        let archive = write_gz_tar(dir.path(), "a.tar.gz", &[("hello.txt", b"hi")]);
        let base = dir.path().join("out");
        fs::create_dir_all(&base).unwrap();
        extract_tar(&archive, &base).unwrap();
        assert_eq!(fs::read(base.join("hello.txt")).unwrap(), b"hi");
    }

    #[test]
    fn rejects_path_traversal_entry() {
        let dir = tempdir().unwrap();
        let archive = write_gz_tar(dir.path(), "evil.tar.gz", &[("../../etc/passwd", b"x")]);
        let base = dir.path().join("out");
        fs::create_dir_all(&base).unwrap();
        let err = extract_tar(&archive, &base).unwrap_err();
        assert!(matches!(err, EngineError::PathTraversal { .. }));
    }

    #[test]
    fn extracts_zip_files_with_mode() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("a.zip");
        {
            let file = fs::File::create(&archive_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default()
                .unix_permissions(0o755);
            zip.start_file("bin/tool", options).unwrap();
            zip.write_all(b"binary").unwrap();
            zip.finish().unwrap();
        }
        let base = dir.path().join("out");
        fs::create_dir_all(&base).unwrap();
        extract_zip(&archive_path, &base).unwrap();
        assert_eq!(fs::read(base.join("bin/tool")).unwrap(), b"binary");
    }
}
