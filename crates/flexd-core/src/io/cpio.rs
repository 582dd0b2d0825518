//! CPIO "new ASCII" (newc) reader.
//!
//! Hand-rolled rather than built on the ecosystem `cpio` crate: the format
//! here is consumed exclusively as RPM payload content, where the exact
//! offsets and padding rules below are load-bearing for path-traversal
//! safety (the check must see the same link target and name the archive
//! actually stores, not whatever the trailer convention of a generic writer
//! crate happens to produce).

use std::io::Read;
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::io::safe_path::{safe_join, safe_symlink_target};

const HEADER_LEN: usize = 110;
const MAGIC: &[u8] = b"070701";
const TRAILER_NAME: &str = "TRAILER!!!";

const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_DIR: u32 = 0o040000;
const MODE_REGULAR: u32 = 0o100000;
const MODE_SYMLINK: u32 = 0o120000;

struct Header {
    mode: u32,
    filesize: usize,
    namesize: usize,
}

fn parse_hex_field(header: &[u8], offset: usize, label: &str, archive_path: &Path) -> Result<u32> {
    let field = header
        .get(offset..offset + 8)
        .ok_or_else(|| corrupt(archive_path, format!("truncated cpio header field {label}")))?;
    let text = std::str::from_utf8(field)
        .map_err(|_| corrupt(archive_path, format!("non-ascii cpio header field {label}")))?;
    u32::from_str_radix(text, 16)
        .map_err(|_| corrupt(archive_path, format!("bad cpio header field {label}")))
}

fn read_exact_vec<R: Read>(reader: &mut R, len: usize, archive_path: &Path) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| corrupt(archive_path, e))?;
    Ok(buf)
}

/// Skip to the next 4-byte boundary counted from the start of the archive,
/// given `consumed_so_far` bytes already read. Returns the number of pad
/// bytes actually consumed, so callers can keep their own running total in
/// sync with the real stream position.
fn skip_padding<R: Read>(
    reader: &mut R,
    consumed_so_far: usize,
    archive_path: &Path,
) -> Result<usize> {
    let remainder = consumed_so_far % 4;
    if remainder != 0 {
        let pad = 4 - remainder;
        read_exact_vec(reader, pad, archive_path)?;
        Ok(pad)
    } else {
        Ok(0)
    }
}

/// Extract a CPIO newc stream, already decompressed, into `base`.
pub fn extract_cpio<R: Read>(mut reader: R, archive_path: &Path, base: &Path) -> Result<()> {
    let label = archive_path.display().to_string();
    let mut total_consumed: usize = 0;

    loop {
        let raw_header = read_exact_vec(&mut reader, HEADER_LEN, archive_path)?;
        total_consumed += HEADER_LEN;
        if &raw_header[0..6] != MAGIC {
            return Err(corrupt(archive_path, "bad cpio newc magic"));
        }
        let header = Header {
            mode: parse_hex_field(&raw_header, 14, "mode", archive_path)?,
            filesize: parse_hex_field(&raw_header, 54, "filesize", archive_path)? as usize,
            namesize: parse_hex_field(&raw_header, 94, "namesize", archive_path)? as usize,
        };

        let name_bytes = read_exact_vec(&mut reader, header.namesize, archive_path)?;
        total_consumed += header.namesize;
        total_consumed += skip_padding(&mut reader, total_consumed, archive_path)?;

        // namesize includes the trailing NUL.
        let raw_name = std::str::from_utf8(&name_bytes[..name_bytes.len().saturating_sub(1)])
            .map_err(|_| corrupt(archive_path, "non-utf8 cpio entry name"))?;
        let name = raw_name
            .strip_prefix("./")
            .or_else(|| raw_name.strip_prefix('/'))
            .unwrap_or(raw_name)
            .to_string();

        let file_data = read_exact_vec(&mut reader, header.filesize, archive_path)?;
        total_consumed += header.filesize;
        total_consumed += skip_padding(&mut reader, total_consumed, archive_path)?;

        if name == TRAILER_NAME {
            break;
        }

        let target = safe_join(base, &name, &label)?;
        match header.mode & MODE_TYPE_MASK {
            MODE_DIR => {
                std::fs::create_dir_all(&target)?;
            }
            MODE_REGULAR => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, &file_data)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        &target,
                        std::fs::Permissions::from_mode(header.mode & 0o7777),
                    )?;
                }
            }
            MODE_SYMLINK => {
                let link_target = std::str::from_utf8(&file_data)
                    .map_err(|_| corrupt(archive_path, "non-utf8 cpio symlink target"))?;
                let parent = target.parent().unwrap_or(base);
                safe_symlink_target(base, parent, link_target, &label)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                #[cfg(unix)]
                std::os::unix::fs::symlink(link_target, &target)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn corrupt(path: &Path, msg: impl std::fmt::Display) -> EngineError {
    EngineError::CorruptArchive {
        path: path.to_path_buf(),
        message: msg.to_string(),
    }
}
