//! Magic-byte compression detection and transparent decompression.

use std::io::{BufRead, Read};
use std::path::Path;

use crate::error::{EngineError, Result};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
    Xz,
}

/// Peek at `reader`'s buffer (without consuming it) and classify the
/// compression format by magic bytes. `label` is used only for the error
/// message when nothing matches.
pub fn detect<R: BufRead>(reader: &mut R, label: &Path) -> Result<Compression> {
    let buf = reader.fill_buf()?;
    if buf.starts_with(XZ_MAGIC) {
        Ok(Compression::Xz)
    } else if buf.starts_with(ZSTD_MAGIC) {
        Ok(Compression::Zstd)
    } else if buf.starts_with(GZIP_MAGIC) {
        Ok(Compression::Gzip)
    } else {
        Err(EngineError::UnsupportedCompression {
            path: label.to_path_buf(),
        })
    }
}

/// Wrap `reader` in the appropriate decompressor, detected by peeking its
/// magic bytes first. The returned reader yields the decompressed stream.
pub fn detect_and_decompress<'a, R: BufRead + 'a>(
    mut reader: R,
    label: &Path,
) -> Result<Box<dyn Read + 'a>> {
    match detect(&mut reader, label)? {
        Compression::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        Compression::Zstd => Ok(Box::new(zstd::stream::Decoder::new(reader)?)),
        Compression::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn detects_gzip() {
        let mut r = BufReader::new(Cursor::new(vec![0x1f, 0x8b, 0x08, 0x00]));
        assert_eq!(detect(&mut r, Path::new("x")).unwrap(), Compression::Gzip);
    }

    #[test]
    fn detects_zstd() {
        let mut r = BufReader::new(Cursor::new(vec![0x28, 0xb5, 0x2f, 0xfd, 0x00]));
        assert_eq!(detect(&mut r, Path::new("x")).unwrap(), Compression::Zstd);
    }

    #[test]
    fn detects_xz() {
        let mut r = BufReader::new(Cursor::new(vec![0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00, 0x00]));
        assert_eq!(detect(&mut r, Path::new("x")).unwrap(), Compression::Xz);
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut r = BufReader::new(Cursor::new(vec![0x00, 0x01, 0x02, 0x03]));
        assert!(detect(&mut r, Path::new("x")).is_err());
    }
}
