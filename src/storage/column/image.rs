//! Immutable on-disk image of a column-store leaf page.
//!
//! Layout (big-endian):
//!
//! ```text
//! 0      kind        u8   (1 = fixed, 2 = repeat-count compressed)
//! 1      flags       u8   (reserved, zero)
//! 2..4   slot_count  u16
//! 4..6   value_len   u16
//! 6..8   reserved    u16
//! 8..16  start_recno u64
//! 16..   slots
//! ```
//!
//! A fixed slot is `value_len` bytes. A compressed slot is a `repeat: u32`
//! (at least one) followed by `value_len` bytes and stands for `repeat`
//! consecutive records sharing that value.

use std::convert::TryInto;

use crate::types::{ColStoreError, Result};

/// Length of the fixed image header.
pub const IMAGE_HDR_LEN: usize = 16;
/// Length of the repeat count that prefixes every compressed slot.
pub const REPEAT_LEN: usize = 4;

const KIND_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 1;
const SLOT_COUNT_OFFSET: usize = 2;
const VALUE_LEN_OFFSET: usize = 4;
const RESERVED_OFFSET: usize = 6;
const START_RECNO_OFFSET: usize = 8;

/// Record representation used by a page image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageKind {
    /// One slot per record.
    Fixed = 1,
    /// One slot per run of identical values.
    RepeatCompressed = 2,
}

impl ImageKind {
    /// Converts the on-disk byte to an [`ImageKind`].
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Fixed),
            2 => Ok(Self::RepeatCompressed),
            _ => Err(ColStoreError::Corruption("unknown column image kind")),
        }
    }
}

/// Decoded image header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Record representation.
    pub kind: ImageKind,
    /// Number of slots (records or runs).
    pub slot_count: u16,
    /// Width of every stored value.
    pub value_len: u16,
    /// Record number of the first record on the page.
    pub start_recno: u64,
}

impl Header {
    /// Parses and validates the header, including that the slot area fits.
    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < IMAGE_HDR_LEN {
            return Err(ColStoreError::Corruption("column image header truncated"));
        }
        let kind = ImageKind::from_u8(image[KIND_OFFSET])?;
        if image[FLAGS_OFFSET] != 0 || read_u16(image, RESERVED_OFFSET) != 0 {
            return Err(ColStoreError::Corruption(
                "column image reserved bytes not zero",
            ));
        }
        let header = Self {
            kind,
            slot_count: read_u16(image, SLOT_COUNT_OFFSET),
            value_len: read_u16(image, VALUE_LEN_OFFSET),
            start_recno: read_u64(image, START_RECNO_OFFSET),
        };
        if image.len() != IMAGE_HDR_LEN + header.slot_count as usize * header.slot_len() {
            return Err(ColStoreError::Corruption("column image length mismatch"));
        }
        Ok(header)
    }

    /// Width of one slot in bytes.
    pub fn slot_len(&self) -> usize {
        match self.kind {
            ImageKind::Fixed => self.value_len as usize,
            ImageKind::RepeatCompressed => REPEAT_LEN + self.value_len as usize,
        }
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        dst.push(self.kind as u8);
        dst.push(0);
        dst.extend_from_slice(&self.slot_count.to_be_bytes());
        dst.extend_from_slice(&self.value_len.to_be_bytes());
        dst.extend_from_slice(&0u16.to_be_bytes());
        dst.extend_from_slice(&self.start_recno.to_be_bytes());
    }
}

/// Where a record number lands inside a page image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Location {
    /// Slot holding the record (or its run).
    pub slot: usize,
    /// Offset of the record within its run; always zero for fixed images.
    pub run_offset: u32,
}

/// Borrowed view over a validated page image.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    header: &'a Header,
    bytes: &'a [u8],
}

impl<'a> ImageView<'a> {
    /// Wraps an image whose header was parsed from `bytes`.
    pub(crate) fn new(header: &'a Header, bytes: &'a [u8]) -> Self {
        Self { header, bytes }
    }

    fn slot_bytes(&self, slot: usize) -> Result<&'a [u8]> {
        if slot >= self.header.slot_count as usize {
            return Err(ColStoreError::Invalid("slot index out of range"));
        }
        let start = IMAGE_HDR_LEN + slot * self.header.slot_len();
        self.bytes
            .get(start..start + self.header.slot_len())
            .ok_or(ColStoreError::Corruption("column image shorter than its header"))
    }

    /// Number of records the slot represents.
    pub fn repeat(&self, slot: usize) -> Result<u32> {
        let raw = self.slot_bytes(slot)?;
        match self.header.kind {
            ImageKind::Fixed => Ok(1),
            ImageKind::RepeatCompressed => {
                let repeat = u32::from_be_bytes(
                    raw[..REPEAT_LEN]
                        .try_into()
                        .map_err(|_| ColStoreError::Corruption("repeat count truncated"))?,
                );
                if repeat == 0 {
                    return Err(ColStoreError::Corruption("zero repeat count"));
                }
                Ok(repeat)
            }
        }
    }

    /// Stored value of the slot.
    pub fn value(&self, slot: usize) -> Result<&'a [u8]> {
        let raw = self.slot_bytes(slot)?;
        Ok(match self.header.kind {
            ImageKind::Fixed => raw,
            ImageKind::RepeatCompressed => &raw[REPEAT_LEN..],
        })
    }

    /// Total records on the page.
    pub fn record_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for slot in 0..self.header.slot_count as usize {
            total += u64::from(self.repeat(slot)?);
        }
        Ok(total)
    }

    /// Resolves a record number to its slot and run offset.
    pub fn locate(&self, recno: u64) -> Result<Option<Location>> {
        let Some(mut rel) = recno.checked_sub(self.header.start_recno) else {
            return Ok(None);
        };
        if self.header.kind == ImageKind::Fixed {
            if rel < u64::from(self.header.slot_count) {
                return Ok(Some(Location {
                    slot: rel as usize,
                    run_offset: 0,
                }));
            }
            return Ok(None);
        }
        for slot in 0..self.header.slot_count as usize {
            let repeat = u64::from(self.repeat(slot)?);
            if rel < repeat {
                return Ok(Some(Location {
                    slot,
                    run_offset: rel as u32,
                }));
            }
            rel -= repeat;
        }
        Ok(None)
    }
}

/// Builds page images, mostly for loading and tests.
#[derive(Debug)]
pub struct ImageBuilder {
    header: Header,
    slots: Vec<u8>,
}

impl ImageBuilder {
    /// Starts a fixed-width image whose first record is `start_recno`.
    pub fn fixed(start_recno: u64, value_len: u16) -> Self {
        Self::new(ImageKind::Fixed, start_recno, value_len)
    }

    /// Starts a repeat-count compressed image whose first record is `start_recno`.
    pub fn repeat_compressed(start_recno: u64, value_len: u16) -> Self {
        Self::new(ImageKind::RepeatCompressed, start_recno, value_len)
    }

    fn new(kind: ImageKind, start_recno: u64, value_len: u16) -> Self {
        Self {
            header: Header {
                kind,
                slot_count: 0,
                value_len,
                start_recno,
            },
            slots: Vec::new(),
        }
    }

    /// Appends one record to a fixed image.
    pub fn push(&mut self, value: &[u8]) -> Result<&mut Self> {
        if self.header.kind != ImageKind::Fixed {
            return Err(ColStoreError::Invalid("push on compressed image; use push_run"));
        }
        self.push_slot(None, value)
    }

    /// Appends a run of `repeat` identical records to a compressed image.
    pub fn push_run(&mut self, repeat: u32, value: &[u8]) -> Result<&mut Self> {
        if self.header.kind != ImageKind::RepeatCompressed {
            return Err(ColStoreError::Invalid("push_run on fixed image"));
        }
        if repeat == 0 {
            return Err(ColStoreError::Invalid("run must hold at least one record"));
        }
        self.push_slot(Some(repeat), value)
    }

    fn push_slot(&mut self, repeat: Option<u32>, value: &[u8]) -> Result<&mut Self> {
        if value.len() != self.header.value_len as usize {
            return Err(ColStoreError::Invalid("value width does not match image"));
        }
        self.header.slot_count = self
            .header
            .slot_count
            .checked_add(1)
            .ok_or(ColStoreError::Invalid("too many slots for one image"))?;
        if let Some(repeat) = repeat {
            self.slots.extend_from_slice(&repeat.to_be_bytes());
        }
        self.slots.extend_from_slice(value);
        Ok(self)
    }

    /// Produces the encoded image.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IMAGE_HDR_LEN + self.slots.len());
        self.header.encode(&mut out);
        out.extend_from_slice(&self.slots);
        out
    }
}

fn read_u16(src: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([src[offset], src[offset + 1]])
}

fn read_u64(src: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[offset..offset + 8]);
    u64::from_be_bytes(buf)
}
