//! Column file: a sequence of page images, each protected by a CRC32.
//!
//! ```text
//! magic "COLF" | version u16 | reserved u16 | page_count u32
//! page_count x ( image_len u32 | image | crc32 u32 )
//! ```
//!
//! Only the compressed images are stored; the in-memory overlay is never
//! written back by this crate.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::types::{image_crc32, ColStoreError, Result};

const FILE_MAGIC: [u8; 4] = *b"COLF";
const FILE_VERSION: u16 = 1;
const FILE_HDR_LEN: usize = 12;

/// Writes `images` to `path`, replacing any existing file.
pub fn write_column_file(path: impl AsRef<Path>, images: &[Vec<u8>]) -> Result<()> {
    let page_count = u32::try_from(images.len())
        .map_err(|_| ColStoreError::Invalid("too many pages for one column file"))?;
    let mut out = Vec::with_capacity(
        FILE_HDR_LEN + images.iter().map(|image| image.len() + 8).sum::<usize>(),
    );
    out.extend_from_slice(&FILE_MAGIC);
    out.extend_from_slice(&FILE_VERSION.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&page_count.to_be_bytes());
    for (idx, image) in images.iter().enumerate() {
        let len = u32::try_from(image.len())
            .map_err(|_| ColStoreError::Invalid("page image too large"))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(image);
        out.extend_from_slice(&image_crc32(idx as u64, image).to_be_bytes());
    }
    let mut file = File::create(path.as_ref())?;
    file.write_all(&out)?;
    file.sync_all()?;
    tracing::debug!(path = %path.as_ref().display(), pages = images.len(), "column file written");
    Ok(())
}

/// Reads every page image from `path`, verifying checksums when asked.
pub fn read_column_file(path: impl AsRef<Path>, verify_checksums: bool) -> Result<Vec<Vec<u8>>> {
    let raw = fs::read(path.as_ref())?;
    let mut reader = Reader { buf: &raw, pos: 0 };
    if reader.take(4)? != FILE_MAGIC {
        return Err(ColStoreError::Corruption("invalid column file magic"));
    }
    if reader.u16()? != FILE_VERSION {
        return Err(ColStoreError::Corruption("unsupported column file version"));
    }
    if reader.u16()? != 0 {
        return Err(ColStoreError::Corruption("column file reserved bytes not zero"));
    }
    let page_count = reader.u32()? as usize;
    let mut images = Vec::with_capacity(page_count.min(1024));
    for idx in 0..page_count {
        let len = reader.u32()? as usize;
        let image = reader.take(len)?.to_vec();
        let stored = reader.u32()?;
        if verify_checksums && stored != image_crc32(idx as u64, &image) {
            tracing::warn!(page = idx, "column file checksum mismatch");
            return Err(ColStoreError::Corruption("page image checksum mismatch"));
        }
        images.push(image);
    }
    if reader.pos != raw.len() {
        return Err(ColStoreError::Corruption("trailing bytes after last page"));
    }
    Ok(images)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ColStoreError::Corruption("column file truncated"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}
