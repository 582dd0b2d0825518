//! RPM extraction: skip the lead and both headers, then decompress and
//! unpack the CPIO newc payload.

use std::io::{BufReader, Cursor};
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::io::compression;
use crate::io::cpio::extract_cpio;

const LEAD_LEN: usize = 96;
const HEADER_MAGIC: &[u8; 4] = &[0x8e, 0xad, 0xe8, 0x01];
const HEADER_PREFIX_LEN: usize = 16; // magic(4) + reserved(4) + index_count(4) + data_size(4)
const INDEX_ENTRY_LEN: usize = 16;

/// Parse one RPM header region starting at `offset`, returning the offset
/// just past it (before any padding).
fn parse_header_region(bytes: &[u8], offset: usize, archive_path: &Path) -> Result<usize> {
    let header = bytes
        .get(offset..offset + HEADER_PREFIX_LEN)
        .ok_or_else(|| corrupt(archive_path, "truncated rpm header"))?;
    if &header[0..4] != HEADER_MAGIC {
        return Err(corrupt(archive_path, "bad rpm header magic"));
    }
    let index_count = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
    let data_size = u32::from_be_bytes(header[12..16].try_into().unwrap()) as usize;
    let region_len = HEADER_PREFIX_LEN + index_count * INDEX_ENTRY_LEN + data_size;
    Ok(offset + region_len)
}

fn align_up(offset: usize, align: usize) -> usize {
    let rem = offset % align;
    if rem == 0 {
        offset
    } else {
        offset + (align - rem)
    }
}

/// Extract an RPM archive at `archive_path` into `base`.
pub fn extract_rpm(archive_path: &Path, base: &Path) -> Result<()> {
    let bytes = std::fs::read(archive_path)?;
    if bytes.len() < LEAD_LEN {
        return Err(corrupt(archive_path, "file shorter than rpm lead"));
    }

    let signature_end = parse_header_region(&bytes, LEAD_LEN, archive_path)?;
    // The signature header alone is padded upward to the next 8-byte boundary.
    let main_start = align_up(signature_end, 8);
    let main_end = parse_header_region(&bytes, main_start, archive_path)?;
    // The main header is not padded.
    let payload = bytes
        .get(main_end..)
        .ok_or_else(|| corrupt(archive_path, "rpm payload offset out of range"))?;

    let cursor = BufReader::new(Cursor::new(payload));
    let decompressed = compression::detect_and_decompress(cursor, archive_path)?;
    extract_cpio(decompressed, archive_path, base)
}

fn corrupt(path: &Path, msg: impl std::fmt::Display) -> EngineError {
    EngineError::CorruptArchive {
        path: path.to_path_buf(),
        message: msg.to_string(),
    }
}
