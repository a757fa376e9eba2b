//! Binary layout constants and header/directory I/O for the UI-document
//! format.
//!
//! All fixed-width numeric fields are little-endian.
//!
//! Layout:
//! ```text
//! [Header 32B][Section directory][String table][Property blocks][Templates][Element tree]
//! ```
//!
//! The header is written last: total size and checksum depend on the
//! finalized sections, so the encoder stages everything and backpatches.

pub mod sections;

use crate::error::{Error, Result};
use crate::version::FormatVersion;

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes identifying a binary UI document.
pub const MAGIC: [u8; 4] = *b"UIDB";

/// Header size in bytes (fixed).
pub const HEADER_LEN: usize = 32;

/// Byte range of the checksum field within the header. The checksum is
/// computed over the whole stream with this range zeroed.
pub const CHECKSUM_RANGE: std::ops::Range<usize> = 12..16;

// --- Header flags (u16 bitset) ---

/// Bit 0: the document carries script attachments.
pub const FLAG_HAS_SCRIPTS: u16 = 0x0001;
/// Bit 1: the document carries embedded resources.
pub const FLAG_HAS_RESOURCES: u16 = 0x0002;
/// Bit 2: at least one section is zstd-compressed.
pub const FLAG_COMPRESSED: u16 = 0x0004;
/// Bit 3: debug info (source spans) is present.
pub const FLAG_DEBUG_INFO: u16 = 0x0008;

/// Number of entries in the section directory.
pub const SECTION_COUNT: usize = 4;

/// Section directory size: count byte + `SECTION_COUNT` entries of
/// `{id: u8, offset: u32, length: u32}`.
pub const DIRECTORY_LEN: usize = 1 + SECTION_COUNT * 9;

/// Minimum valid document size: header + directory.
pub const MIN_DOC_LEN: usize = HEADER_LEN + DIRECTORY_LEN;

// =============================================================================
// Compression strategy
// =============================================================================

/// Selectable compression strategy for compressible sections.
///
/// The scheme byte is stored once per compressed payload so the decoder
/// knows how to reverse it. Compression is kept only when it reduces net
/// size after the wrapper overhead; otherwise the payload is written with
/// scheme `None` regardless of the requested strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    Fast,
    #[default]
    Balanced,
    Maximum,
}

impl Compression {
    /// The scheme tag byte stored in the stream.
    pub fn scheme_byte(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Fast => 1,
            Compression::Balanced => 2,
            Compression::Maximum => 3,
        }
    }

    pub fn from_scheme_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Compression::None),
            1 => Some(Compression::Fast),
            2 => Some(Compression::Balanced),
            3 => Some(Compression::Maximum),
            _ => None,
        }
    }

    /// zstd level for this strategy, or `None` when compression is off.
    pub fn zstd_level(self) -> Option<i32> {
        match self {
            Compression::None => None,
            Compression::Fast => Some(1),
            Compression::Balanced => Some(3),
            Compression::Maximum => Some(19),
        }
    }
}

// =============================================================================
// Section ids
// =============================================================================

/// Section discriminant in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionId {
    StringTable = 1,
    PropertyBlocks = 2,
    Templates = 3,
    ElementTree = 4,
}

impl SectionId {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(SectionId::StringTable),
            2 => Some(SectionId::PropertyBlocks),
            3 => Some(SectionId::Templates),
            4 => Some(SectionId::ElementTree),
            _ => None,
        }
    }

    /// Canonical directory/stream order.
    pub const ORDER: [SectionId; SECTION_COUNT] = [
        SectionId::StringTable,
        SectionId::PropertyBlocks,
        SectionId::Templates,
        SectionId::ElementTree,
    ];
}

/// A directory entry pointing into the byte stream.
#[derive(Debug, Clone, Copy)]
pub struct SectionEntry {
    pub id: SectionId,
    pub offset: u32,
    pub length: u32,
}

/// Write the section directory into `buf` at `pos` (must have
/// `DIRECTORY_LEN` bytes available).
pub fn write_directory(buf: &mut [u8], pos: usize, entries: &[SectionEntry; SECTION_COUNT]) {
    debug_assert!(buf.len() >= pos + DIRECTORY_LEN);
    buf[pos] = SECTION_COUNT as u8;
    let mut p = pos + 1;
    for e in entries {
        buf[p] = e.id as u8;
        buf[p + 1..p + 5].copy_from_slice(&e.offset.to_le_bytes());
        buf[p + 5..p + 9].copy_from_slice(&e.length.to_le_bytes());
        p += 9;
    }
}

/// Read the section directory starting at `pos`. Entries must appear in
/// canonical order; offsets and lengths are validated against `total_len`.
pub fn read_directory(buf: &[u8], pos: usize, total_len: usize) -> Result<[SectionEntry; SECTION_COUNT]> {
    if buf.len() < pos + DIRECTORY_LEN {
        return Err(Error::UnexpectedEof {
            offset: pos,
            need: DIRECTORY_LEN,
            context: "section directory",
        });
    }
    let count = buf[pos] as usize;
    if count != SECTION_COUNT {
        return Err(Error::Corruption(format!(
            "section directory has {count} entries, expected {SECTION_COUNT}"
        )));
    }
    let mut entries = [SectionEntry {
        id: SectionId::StringTable,
        offset: 0,
        length: 0,
    }; SECTION_COUNT];
    let mut p = pos + 1;
    for (i, expected) in SectionId::ORDER.iter().enumerate() {
        let id = SectionId::from_u8(buf[p]).ok_or_else(|| {
            Error::Corruption(format!("unknown section id {:#04x} in directory", buf[p]))
        })?;
        if id != *expected {
            return Err(Error::Corruption(format!(
                "section {id:?} out of canonical order (expected {expected:?})"
            )));
        }
        let offset = u32::from_le_bytes(buf[p + 1..p + 5].try_into().unwrap());
        let length = u32::from_le_bytes(buf[p + 5..p + 9].try_into().unwrap());
        let end = offset as u64 + length as u64;
        if (offset as usize) < MIN_DOC_LEN || end > total_len as u64 {
            return Err(Error::Corruption(format!(
                "section {id:?} range {offset}+{length} exceeds document ({total_len} bytes)"
            )));
        }
        entries[i] = SectionEntry { id, offset, length };
        p += 9;
    }
    Ok(entries)
}

// =============================================================================
// Header
// =============================================================================

/// 32-byte fixed header. Computed once at the end of encoding, after all
/// other sections are finalized.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub version: FormatVersion,
    pub flags: u16,
    pub total_size: u32,
    pub checksum: u32,
}

impl FileHeader {
    /// Write the header into the first 32 bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_LEN);
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.major;
        buf[5] = self.version.minor;
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        // reserved bytes 16..32
        buf[16..32].fill(0);
    }

    /// Read the header from the first 32 bytes of `buf`.
    ///
    /// Only validates magic and structural size here; version support is the
    /// negotiator's call, made by the loader.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < MIN_DOC_LEN {
            return Err(Error::Format(format!(
                "document too small ({} bytes, need >= {MIN_DOC_LEN})",
                buf.len()
            )));
        }
        if buf[0..4] != MAGIC {
            return Err(Error::Format("invalid magic bytes (expected UIDB)".into()));
        }
        let version = FormatVersion::new(buf[4], buf[5]);
        let flags = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let total_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let checksum = u32::from_le_bytes(buf[12..16].try_into().unwrap());

        Ok(Self {
            version,
            flags,
            total_size,
            checksum,
        })
    }
}

/// Compute the stream checksum: xxh32 over the whole document with the
/// header checksum field zeroed.
pub fn stream_checksum(bytes: &[u8]) -> u32 {
    use xxhash_rust::xxh32::Xxh32;
    let mut h = Xxh32::new(0);
    h.update(&bytes[..CHECKSUM_RANGE.start]);
    h.update(&[0u8; 4]);
    h.update(&bytes[CHECKSUM_RANGE.end..]);
    h.digest()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = FileHeader {
            version: FormatVersion::new(1, 2),
            flags: FLAG_COMPRESSED | FLAG_DEBUG_INFO,
            total_size: 4096,
            checksum: 0xDEAD_BEEF,
        };
        let mut buf = vec![0u8; MIN_DOC_LEN];
        header.write_to(&mut buf);

        let parsed = FileHeader::read_from(&buf).unwrap();
        assert_eq!(parsed.version, FormatVersion::new(1, 2));
        assert_eq!(parsed.flags, FLAG_COMPRESSED | FLAG_DEBUG_INFO);
        assert_eq!(parsed.total_size, 4096);
        assert_eq!(parsed.checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn test_header_bad_magic() {
        let mut buf = vec![0u8; MIN_DOC_LEN];
        buf[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            FileHeader::read_from(&buf),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_header_too_small() {
        assert!(matches!(
            FileHeader::read_from(&[0u8; 8]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_directory_round_trip() {
        let entries = [
            SectionEntry { id: SectionId::StringTable, offset: 69, length: 10 },
            SectionEntry { id: SectionId::PropertyBlocks, offset: 79, length: 20 },
            SectionEntry { id: SectionId::Templates, offset: 99, length: 0 },
            SectionEntry { id: SectionId::ElementTree, offset: 99, length: 30 },
        ];
        let mut buf = vec![0u8; MIN_DOC_LEN + 60];
        write_directory(&mut buf, HEADER_LEN, &entries);

        let parsed = read_directory(&buf, HEADER_LEN, buf.len()).unwrap();
        for (a, b) in parsed.iter().zip(entries.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.offset, b.offset);
            assert_eq!(a.length, b.length);
        }
    }

    #[test]
    fn test_directory_rejects_out_of_range() {
        let entries = [
            SectionEntry { id: SectionId::StringTable, offset: 69, length: 10_000 },
            SectionEntry { id: SectionId::PropertyBlocks, offset: 79, length: 0 },
            SectionEntry { id: SectionId::Templates, offset: 79, length: 0 },
            SectionEntry { id: SectionId::ElementTree, offset: 79, length: 0 },
        ];
        let mut buf = vec![0u8; MIN_DOC_LEN + 60];
        write_directory(&mut buf, HEADER_LEN, &entries);
        assert!(matches!(
            read_directory(&buf, HEADER_LEN, buf.len()),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_checksum_sensitive_to_any_bit() {
        let mut buf = vec![0u8; 64];
        buf[0..4].copy_from_slice(&MAGIC);
        let base = stream_checksum(&buf);

        // Flip one bit outside the checksum field.
        buf[40] ^= 0x10;
        assert_ne!(stream_checksum(&buf), base);
        buf[40] ^= 0x10;

        // Flipping bits inside the checksum field does not change the sum.
        buf[13] ^= 0xFF;
        assert_eq!(stream_checksum(&buf), base);
    }

    #[test]
    fn test_compression_scheme_round_trip() {
        for c in [
            Compression::None,
            Compression::Fast,
            Compression::Balanced,
            Compression::Maximum,
        ] {
            assert_eq!(Compression::from_scheme_byte(c.scheme_byte()), Some(c));
        }
        assert_eq!(Compression::from_scheme_byte(9), None);
    }
}
