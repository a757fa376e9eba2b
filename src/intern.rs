//! String interner: build-side dedup table and read-side decoded table.
//!
//! Every string literal in a document passes through [`StringInterner::intern`]
//! before it is referenced anywhere else, guaranteeing at most one stored copy
//! per distinct byte sequence. Indices are append-only and sequential.
//!
//! Wire format:
//! ```text
//! table   := [scheme: u8][uncompressed_len: varint, if scheme != 0][payload]
//! payload := [count: varint] record*
//! record  := [kind: u8]
//!            kind 0 (full):     [len: varint][utf8 bytes]
//!            kind 1 (factored): [base: varint][suffix_len: varint][suffix bytes]
//! ```
//!
//! Factored records represent a string as an earlier full record plus a
//! suffix, used only when strictly smaller than the full encoding. Exact
//! dedup always wins over factoring: factoring is attempted only for strings
//! not already interned, and only against fully-stored bases, so decoding
//! never chases factoring chains.

use crate::error::{Error, Result};
use crate::format::Compression;
use crate::varint::{decode_varint, encode_varint};
use rustc_hash::FxHashMap;

/// Index of an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringIndex(pub u32);

const RECORD_FULL: u8 = 0;
const RECORD_FACTORED: u8 = 1;

/// Byte length of a varint encoding for `v`.
fn varint_len(v: u32) -> usize {
    match v {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

#[derive(Debug, Clone)]
enum Repr {
    Full(String),
    Factored { base: u32, suffix: String },
}

#[derive(Debug, Clone)]
struct Record {
    repr: Repr,
    ref_count: u32,
}

/// Build-side string interner.
#[derive(Debug, Default)]
pub struct StringInterner {
    /// Full resolved text -> index, for O(1) exact dedup.
    map: FxHashMap<String, u32>,
    records: Vec<Record>,
    /// Whether suffix factoring is attempted for novel strings.
    factoring: bool,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            records: Vec::new(),
            factoring: true,
        }
    }

    /// Create an interner with suffix factoring disabled (optimization
    /// level 0, or a target version without the feature).
    pub fn without_factoring() -> Self {
        Self {
            factoring: false,
            ..Self::new()
        }
    }

    /// Intern a string, returning an existing index for known content.
    pub fn intern(&mut self, s: &str) -> StringIndex {
        if let Some(&idx) = self.map.get(s) {
            self.records[idx as usize].ref_count += 1;
            return StringIndex(idx);
        }

        let idx = self.records.len() as u32;
        let repr = self
            .factoring
            .then(|| self.factor(s))
            .flatten()
            .unwrap_or_else(|| Repr::Full(s.to_string()));
        self.records.push(Record { repr, ref_count: 1 });
        self.map.insert(s.to_string(), idx);
        StringIndex(idx)
    }

    /// Intern raw bytes, failing immediately on invalid UTF-8.
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> Result<StringIndex> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| Error::Encoding(format!("invalid UTF-8 in string literal: {e}")))?;
        Ok(self.intern(s))
    }

    /// Find a factored representation for a novel string, if one is strictly
    /// smaller than the full encoding.
    ///
    /// Checks progressively shorter prefixes against the dedup map; the
    /// longest fully-stored prefix wins, which is deterministic because the
    /// map holds at most one index per text.
    fn factor(&self, s: &str) -> Option<Repr> {
        let full_cost = 1 + varint_len(s.len() as u32) + s.len();
        for end in (1..s.len()).rev() {
            if !s.is_char_boundary(end) {
                continue;
            }
            let Some(&base) = self.map.get(&s[..end]) else {
                continue;
            };
            // Only full records may serve as bases; no chains.
            if !matches!(self.records[base as usize].repr, Repr::Full(_)) {
                continue;
            }
            let suffix = &s[end..];
            let factored_cost =
                1 + varint_len(base) + varint_len(suffix.len() as u32) + suffix.len();
            if factored_cost < full_cost {
                return Some(Repr::Factored {
                    base,
                    suffix: suffix.to_string(),
                });
            }
            // A longer prefix gives the smallest suffix; shorter prefixes
            // only cost more, so stop at the first hit.
            return None;
        }
        None
    }

    /// Resolve an index back to its full text.
    pub fn resolve(&self, idx: StringIndex) -> Option<String> {
        let rec = self.records.get(idx.0 as usize)?;
        Some(match &rec.repr {
            Repr::Full(s) => s.clone(),
            Repr::Factored { base, suffix } => {
                let Repr::Full(base_text) = &self.records[*base as usize].repr else {
                    unreachable!("factored base is always a full record");
                };
                format!("{base_text}{suffix}")
            }
        })
    }

    /// How many times this string has been interned.
    pub fn ref_count(&self, idx: StringIndex) -> u32 {
        self.records[idx.0 as usize].ref_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge another interner into this one, re-running dedup lookups.
    ///
    /// Returns the index remap: `remap[i]` is the index in `self` for
    /// `other`'s index `i`. Supports parallel per-subtree interning with a
    /// sequential merge.
    pub fn merge(&mut self, other: &StringInterner) -> Vec<StringIndex> {
        let mut remap = Vec::with_capacity(other.len());
        for i in 0..other.records.len() {
            let text = other
                .resolve(StringIndex(i as u32))
                .unwrap_or_else(|| unreachable!("index {i} in range"));
            let idx = self.intern(&text);
            // `intern` bumped by one; carry the remaining references over.
            self.records[idx.0 as usize].ref_count += other.records[i].ref_count - 1;
            remap.push(idx);
        }
        remap
    }

    /// Serialize the table, compressing the payload when the requested
    /// strategy actually shrinks it.
    pub fn serialize(&self, compression: Compression) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64);
        encode_varint(self.records.len() as u32, &mut payload);
        for rec in &self.records {
            match &rec.repr {
                Repr::Full(s) => {
                    payload.push(RECORD_FULL);
                    encode_varint(s.len() as u32, &mut payload);
                    payload.extend_from_slice(s.as_bytes());
                }
                Repr::Factored { base, suffix } => {
                    payload.push(RECORD_FACTORED);
                    encode_varint(*base, &mut payload);
                    encode_varint(suffix.len() as u32, &mut payload);
                    payload.extend_from_slice(suffix.as_bytes());
                }
            }
        }

        if let Some(level) = compression.zstd_level() {
            if let Ok(compressed) = zstd::encode_all(payload.as_slice(), level) {
                let mut out = Vec::with_capacity(compressed.len() + 6);
                out.push(compression.scheme_byte());
                encode_varint(payload.len() as u32, &mut out);
                out.extend_from_slice(&compressed);
                if out.len() < 1 + payload.len() {
                    return out;
                }
            }
        }

        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(Compression::None.scheme_byte());
        out.extend_from_slice(&payload);
        out
    }
}

// =============================================================================
// Read path
// =============================================================================

/// Decoded string table for the read path. Factored records are resolved
/// eagerly so lookups are O(1) slices.
#[derive(Debug)]
pub struct StringTable {
    entries: Vec<String>,
}

impl StringTable {
    /// Decode a table produced by [`StringInterner::serialize`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        if data.is_empty() {
            return Err(Error::UnexpectedEof {
                offset: 0,
                need: 1,
                context: "string table scheme",
            });
        }
        let scheme = Compression::from_scheme_byte(data[0]).ok_or_else(|| {
            Error::Corruption(format!("unknown string table scheme {:#04x}", data[0]))
        })?;
        pos += 1;

        let decompressed;
        let payload: &[u8] = if scheme == Compression::None {
            &data[pos..]
        } else {
            let uncompressed_len = decode_varint(data, &mut pos)? as usize;
            decompressed = zstd::decode_all(&data[pos..])
                .map_err(|e| Error::Resource(format!("string table decompression failed: {e}")))?;
            if decompressed.len() != uncompressed_len {
                return Err(Error::Corruption(format!(
                    "string table decompressed to {} bytes, header says {uncompressed_len}",
                    decompressed.len()
                )));
            }
            &decompressed
        };

        let mut pos = 0;
        let count = decode_varint(payload, &mut pos)? as usize;
        let mut entries: Vec<String> = Vec::with_capacity(count);
        for i in 0..count {
            let kind = *payload.get(pos).ok_or(Error::UnexpectedEof {
                offset: pos,
                need: 1,
                context: "string record kind",
            })?;
            pos += 1;
            match kind {
                RECORD_FULL => {
                    let len = decode_varint(payload, &mut pos)? as usize;
                    let text = read_utf8(payload, &mut pos, len)?;
                    entries.push(text.to_string());
                }
                RECORD_FACTORED => {
                    let base = decode_varint(payload, &mut pos)? as usize;
                    if base >= i {
                        return Err(Error::Corruption(format!(
                            "string record {i} factored against forward base {base}"
                        )));
                    }
                    let suffix_len = decode_varint(payload, &mut pos)? as usize;
                    let suffix = read_utf8(payload, &mut pos, suffix_len)?;
                    let mut text = String::with_capacity(entries[base].len() + suffix.len());
                    text.push_str(&entries[base]);
                    text.push_str(suffix);
                    entries.push(text);
                }
                other => {
                    return Err(Error::Corruption(format!(
                        "unknown string record kind {other:#04x}"
                    )))
                }
            }
        }

        Ok(Self { entries })
    }

    /// Look up a string by index.
    pub fn get(&self, idx: StringIndex) -> Result<&str> {
        self.entries
            .get(idx.0 as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| {
                Error::Corruption(format!(
                    "string index {} out of range (table has {} entries)",
                    idx.0,
                    self.entries.len()
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_utf8<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a str> {
    if *pos + len > data.len() {
        return Err(Error::UnexpectedEof {
            offset: *pos,
            need: len,
            context: "string bytes",
        });
    }
    let s = std::str::from_utf8(&data[*pos..*pos + len])
        .map_err(|e| Error::Corruption(format!("invalid UTF-8 in string table: {e}")))?;
    *pos += len;
    Ok(s)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut interner = StringInterner::new();
        let a = interner.intern("Alice");
        let b = interner.intern("Bob");
        let a_again = interner.intern("Alice");

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.ref_count(a), 2);
        assert_eq!(interner.ref_count(b), 1);
    }

    #[test]
    fn test_intern_bytes_rejects_invalid_utf8() {
        let mut interner = StringInterner::new();
        assert!(matches!(
            interner.intern_bytes(&[0xFF, 0xFE]),
            Err(Error::Encoding(_))
        ));
        assert!(interner.is_empty());
    }

    #[test]
    fn test_round_trip_plain() {
        let mut interner = StringInterner::new();
        let ids: Vec<_> = ["title", "background", "名前", ""]
            .iter()
            .map(|s| interner.intern(s))
            .collect();

        let bytes = interner.serialize(Compression::None);
        let table = StringTable::decode(&bytes).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(ids[0]).unwrap(), "title");
        assert_eq!(table.get(ids[2]).unwrap(), "名前");
        assert_eq!(table.get(ids[3]).unwrap(), "");
    }

    #[test]
    fn test_suffix_factoring_round_trip() {
        let mut interner = StringInterner::new();
        let base = interner.intern("com.example.widgets.navigation");
        let derived = interner.intern("com.example.widgets.navigation.drawer");
        assert_ne!(base, derived);

        // Factored encoding must be smaller than storing both in full.
        let factored = interner.serialize(Compression::None);
        let mut plain = StringInterner::without_factoring();
        plain.intern("com.example.widgets.navigation");
        plain.intern("com.example.widgets.navigation.drawer");
        assert!(factored.len() < plain.serialize(Compression::None).len());

        let table = StringTable::decode(&factored).unwrap();
        assert_eq!(
            table.get(derived).unwrap(),
            "com.example.widgets.navigation.drawer"
        );
    }

    #[test]
    fn test_short_strings_round_trip() {
        let mut interner = StringInterner::new();
        interner.intern("ab");
        interner.intern("abc");
        interner.intern("b");
        let bytes = interner.serialize(Compression::None);
        let table = StringTable::decode(&bytes).unwrap();
        assert_eq!(table.get(StringIndex(0)).unwrap(), "ab");
        assert_eq!(table.get(StringIndex(1)).unwrap(), "abc");
        assert_eq!(table.get(StringIndex(2)).unwrap(), "b");
    }

    #[test]
    fn test_exact_dedup_wins_over_factoring() {
        let mut interner = StringInterner::new();
        let first = interner.intern("com.example.app");
        interner.intern("com.example.app.main");
        let again = interner.intern("com.example.app");
        assert_eq!(first, again);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_compressed_round_trip() {
        let mut interner = StringInterner::new();
        for i in 0..200 {
            interner.intern(&format!("com.example.generated.item.{i}"));
        }
        let compressed = interner.serialize(Compression::Balanced);
        let plain = interner.serialize(Compression::None);
        assert!(compressed.len() < plain.len());

        let table = StringTable::decode(&compressed).unwrap();
        assert_eq!(table.len(), 200);
        assert_eq!(
            table.get(StringIndex(7)).unwrap(),
            "com.example.generated.item.7"
        );
    }

    #[test]
    fn test_compression_dropped_when_not_smaller() {
        let mut interner = StringInterner::new();
        interner.intern("x");
        let bytes = interner.serialize(Compression::Maximum);
        // Tiny payloads never win after the zstd frame overhead.
        assert_eq!(bytes[0], Compression::None.scheme_byte());
        let table = StringTable::decode(&bytes).unwrap();
        assert_eq!(table.get(StringIndex(0)).unwrap(), "x");
    }

    #[test]
    fn test_merge_reruns_dedup() {
        let mut left = StringInterner::new();
        let l_title = left.intern("title");
        left.intern("left-only");

        let mut right = StringInterner::new();
        let r_title = right.intern("title");
        right.intern("title");
        let r_other = right.intern("right-only");

        let remap = left.merge(&right);
        assert_eq!(remap[r_title.0 as usize], l_title);
        assert_eq!(left.len(), 3);
        assert_eq!(left.resolve(remap[r_other.0 as usize]).unwrap(), "right-only");
        // 1 from left + 2 from right.
        assert_eq!(left.ref_count(l_title), 3);
    }

    #[test]
    fn test_table_decode_rejects_forward_base() {
        let mut payload = Vec::new();
        payload.push(Compression::None.scheme_byte());
        encode_varint(1, &mut payload);
        payload.push(RECORD_FACTORED);
        encode_varint(5, &mut payload); // base beyond current index
        encode_varint(1, &mut payload);
        payload.push(b'x');
        assert!(matches!(
            StringTable::decode(&payload),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_serialize_deterministic() {
        let build = || {
            let mut i = StringInterner::new();
            for s in ["a", "bb", "a", "ccc", "bb"] {
                i.intern(s);
            }
            i.serialize(Compression::Balanced)
        };
        assert_eq!(build(), build());
    }
}
