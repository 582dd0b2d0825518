//! Debian package (`.deb`) extraction: an ar archive containing
//! `debian-binary`, a `control.tar*` member, and a `data.tar*` member.
//!
//! ar layout: an 8-byte global header `!<arch>\n`, followed by fixed
//! 60-byte member headers (name/mtime/uid/gid/mode/size/end-magic), each
//! immediately followed by the member's data, padded to an even length.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::io::compression;
use crate::io::tar_zip::extract_tar_stream;

const GLOBAL_HEADER: &[u8; 8] = b"!<arch>\n";
const MEMBER_HEADER_LEN: usize = 60;
const END_MAGIC: &[u8; 2] = b"\x60\n";

struct Member {
    name: String,
    data: Vec<u8>,
}

fn parse_members(bytes: &[u8], archive_path: &Path) -> Result<Vec<Member>> {
    if bytes.len() < 8 || &bytes[..8] != GLOBAL_HEADER {
        return Err(corrupt(archive_path, "missing ar global header"));
    }
    let mut offset = 8;
    let mut members = Vec::new();

    while offset < bytes.len() {
        if offset + MEMBER_HEADER_LEN > bytes.len() {
            return Err(corrupt(archive_path, "truncated ar member header"));
        }
        let header = &bytes[offset..offset + MEMBER_HEADER_LEN];
        if &header[58..60] != END_MAGIC {
            return Err(corrupt(archive_path, "bad ar member end magic"));
        }
        let raw_name = std::str::from_utf8(&header[0..16])
            .map_err(|_| corrupt(archive_path, "non-utf8 ar member name"))?
            .trim_end_matches(' ');
        let name = raw_name.trim_end_matches('/').to_string();
        let size_str = std::str::from_utf8(&header[48..58])
            .map_err(|_| corrupt(archive_path, "non-utf8 ar member size"))?
            .trim();
        let size: usize = size_str
            .parse()
            .map_err(|_| corrupt(archive_path, "bad ar member size"))?;

        let data_start = offset + MEMBER_HEADER_LEN;
        let data_end = data_start + size;
        if data_end > bytes.len() {
            return Err(corrupt(archive_path, "ar member data overruns archive"));
        }
        let data = bytes[data_start..data_end].to_vec();
        members.push(Member { name, data });

        // Members are padded to an even total length.
        offset = data_end + (size % 2);
    }
    Ok(members)
}

/// Extract a `.deb` archive at `archive_path` into `base`. Locates the
/// `data.tar` (or `data.tar.<ext>`) member, auto-detects its compression,
/// and extracts the inner tar. `debian-binary` and `control.tar*` members
/// are skipped.
pub fn extract_deb(archive_path: &Path, base: &Path) -> Result<()> {
    let bytes = fs::read(archive_path)?;
    let members = parse_members(&bytes, archive_path)?;

    if !members.iter().any(|m| m.name == "debian-binary") {
        return Err(corrupt(archive_path, "missing debian-binary member"));
    }
    let data_member = members
        .iter()
        .find(|m| m.name.starts_with("data.tar"))
        .ok_or_else(|| corrupt(archive_path, "missing data.tar member"))?;

    let cursor = std::io::BufReader::new(Cursor::new(&data_member.data));
    let decompressed: Box<dyn Read> = if data_member.name == "data.tar" {
        Box::new(cursor)
    } else {
        compression::detect_and_decompress(cursor, archive_path)?
    };
    extract_tar_stream(decompressed, archive_path, base)
}

fn corrupt(path: &Path, msg: impl std::fmt::Display) -> EngineError {
    EngineError::CorruptArchive {
        path: path.to_path_buf(),
        message: msg.to_string(),
    }
}
