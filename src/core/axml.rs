//! Minimal surgery on a compiled binary XML document.
//!
//! Only three header words are touched. The XML chunk header at offset 0
//! carries the document size; the string pool chunk starts right after it at
//! offset 8 and carries its own size at 12 and the start of its string data at
//! 28. Zero padding is inserted in front of that string data, inside the pool,
//! and the three words are shifted so the platform parser still finds
//! everything while tools that assume a tightly packed pool do not.

use crate::core::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

pub const FILE_SIZE_OFFSET: usize = 0x04;
pub const STRING_POOL_SIZE_OFFSET: usize = 0x0c;
pub const STRING_POOL_OFFSET_OFFSET: usize = 0x1c;

/// Shortest buffer that holds every header word we read.
pub const MIN_DOCUMENT_LEN: usize = STRING_POOL_OFFSET_OFFSET + 4;

/// Size of the generic `ResChunkHeader` in front of the string pool.
const CHUNK_HEADER_SIZE: u32 = 8;

/// Number of zero bytes to insert. Always a multiple of 4 so every chunk that
/// follows keeps its 4-byte alignment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Padding(u32);

impl Padding {
    pub const ZERO: Padding = Padding(0);

    pub fn new(len: i64) -> Result<Self> {
        if len < 0 {
            return Err(Error::Validation(format!(
                "null byte count must not be negative, got {len}"
            )));
        }
        if len % 4 != 0 {
            return Err(Error::Validation(format!(
                "null byte count must be a multiple of 4, got {len}"
            )));
        }
        let len = u32::try_from(len).map_err(|_| {
            Error::Validation(format!("null byte count {len} does not fit in 32 bits"))
        })?;
        Ok(Self(len))
    }

    /// Like [`Padding::new`] but also enforces an upper bound when one is set.
    pub fn with_limit(len: i64, max: Option<u32>) -> Result<Self> {
        let padding = Self::new(len)?;
        match max {
            Some(max) if padding.0 > max => Err(Error::Validation(format!(
                "null byte count {} exceeds the configured maximum of {max}",
                padding.0
            ))),
            _ => Ok(padding),
        }
    }

    pub fn len(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Padding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ManifestHeader {
    pub file_size: u32,
    pub string_pool_size: u32,
    pub string_pool_offset: u32,
}

impl ManifestHeader {
    pub fn read(doc: &[u8]) -> Result<Self> {
        if doc.len() < MIN_DOCUMENT_LEN {
            return Err(Error::Format(format!(
                "document is {} bytes, header needs at least {MIN_DOCUMENT_LEN}",
                doc.len()
            )));
        }
        Ok(Self {
            file_size: read_u32_at(doc, FILE_SIZE_OFFSET)?,
            string_pool_size: read_u32_at(doc, STRING_POOL_SIZE_OFFSET)?,
            string_pool_offset: read_u32_at(doc, STRING_POOL_OFFSET_OFFSET)?,
        })
    }

    /// Where padding goes: past the pool's own chunk header.
    pub fn insertion_offset(&self) -> u64 {
        u64::from(self.string_pool_offset) + u64::from(CHUNK_HEADER_SIZE)
    }

    /// The header after `padding` bytes have been inserted. Wraps on overflow
    /// so a word can never bleed into its neighbours.
    pub fn shifted(&self, padding: Padding) -> Self {
        Self {
            file_size: self.file_size.wrapping_add(padding.len()),
            string_pool_size: self.string_pool_size.wrapping_add(padding.len()),
            string_pool_offset: self.string_pool_offset.wrapping_add(padding.len()),
        }
    }

    fn write(&self, doc: &mut [u8]) {
        LittleEndian::write_u32(&mut doc[FILE_SIZE_OFFSET..], self.file_size);
        LittleEndian::write_u32(&mut doc[STRING_POOL_SIZE_OFFSET..], self.string_pool_size);
        LittleEndian::write_u32(
            &mut doc[STRING_POOL_OFFSET_OFFSET..],
            self.string_pool_offset,
        );
    }
}

fn read_u32_at(doc: &[u8], offset: usize) -> Result<u32> {
    let word = doc
        .get(offset..offset + 4)
        .ok_or_else(|| Error::Format(format!("header word at 0x{offset:02x} out of bounds")))?;
    Cursor::new(word)
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Format(format!("header word at 0x{offset:02x}: {e}")))
}

/// Returns a copy of `doc` with `padding` zero bytes inserted inside the
/// string pool and the header words describing the layout updated to match.
/// `doc` itself is never modified.
pub fn insert_padding(doc: &[u8], padding: Padding) -> Result<Vec<u8>> {
    let header = ManifestHeader::read(doc)?;
    let insert_at = header.insertion_offset();
    if insert_at > doc.len() as u64 {
        return Err(Error::Format(format!(
            "string pool offset {} puts the insertion point at {insert_at}, past the end of a {} byte document",
            header.string_pool_offset,
            doc.len()
        )));
    }
    if header.file_size as usize != doc.len() {
        log::warn!(
            "Manifest header claims {} bytes but the document is {} bytes",
            header.file_size,
            doc.len()
        );
    }

    let insert_at = insert_at as usize;
    let mut patched = Vec::with_capacity(doc.len() + padding.len() as usize);
    patched.extend_from_slice(&doc[..insert_at]);
    patched.resize(insert_at + padding.len() as usize, 0);
    patched.extend_from_slice(&doc[insert_at..]);

    let shifted = header.shifted(padding);
    shifted.write(&mut patched);
    log::debug!(
        "Inserted {padding} null bytes at 0x{insert_at:x}: size {} -> {}, pool size {} -> {}, pool offset {} -> {}",
        header.file_size,
        shifted.file_size,
        header.string_pool_size,
        shifted.string_pool_size,
        header.string_pool_offset,
        shifted.string_pool_offset,
    );
    Ok(patched)
}
