//! Property block builder: canonicalizes and deduplicates property sets into
//! shared blocks referenced by index.
//!
//! Canonical form: default-valued entries eliminated, remaining entries
//! sorted by `(property_id, type_tag)`. Two blocks with identical canonical
//! entry sequences collapse to one stored block — dedup is by xxh3 content
//! hash with an exact byte comparison on hash hits, never hash alone.
//!
//! Block wire format (canonical, also the dedup key):
//! ```text
//! block  := [inline_count: varint] inline*
//!           [packed_bool_count: varint][property_id: varint]* [bitmap bytes]
//! inline := [property_id: varint][type_tag: u8][payload]
//! ```
//! Booleans are bit-packed when a block holds two or more; a single boolean
//! stays inline (a one-entry bitmap costs more than a tag byte). Integers
//! are zigzag varints (smallest exact representation), colors are always
//! 4 bytes R,G,B,A, floats are 4-byte IEEE-754 LE.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Error, Result};
use crate::intern::StringIndex;
use crate::ir::{Color, TypeTag};
use crate::varint::{
    decode_varint, decode_varint64, encode_varint, encode_varint64, zigzag_decode, zigzag_encode,
};
use crate::version::FeatureCapabilitySet;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

/// Index of a stored property block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub u32);

/// A property value with strings already interned.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockValue {
    Str(StringIndex),
    Int(i64),
    Float(f32),
    Color(Color),
    Bool(bool),
    Enum(u32),
    StyleRef(u32),
    VarRef(u32),
}

impl BlockValue {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            BlockValue::Str(_) => TypeTag::Str,
            BlockValue::Int(_) => TypeTag::Int,
            BlockValue::Float(_) => TypeTag::Float,
            BlockValue::Color(_) => TypeTag::Color,
            BlockValue::Bool(_) => TypeTag::Bool,
            BlockValue::Enum(_) => TypeTag::Enum,
            BlockValue::StyleRef(_) => TypeTag::StyleRef,
            BlockValue::VarRef(_) => TypeTag::VarRef,
        }
    }
}

/// One canonicalizable property assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEntry {
    pub property_id: u32,
    pub value: BlockValue,
}

// =============================================================================
// Well-known property ids and the static default table
// =============================================================================

/// Property ids with defined defaults in the standard table.
pub mod property_ids {
    pub const VISIBLE: u32 = 0;
    pub const OPACITY: u32 = 1;
    pub const PADDING: u32 = 2;
    pub const MARGIN: u32 = 3;
    pub const BACKGROUND_COLOR: u32 = 4;
    pub const TEXT: u32 = 5;
    pub const FONT_SIZE: u32 = 6;
    pub const ENABLED: u32 = 7;
}

/// Static table of declared default values, keyed by
/// `(element wire tag, property_id)`. Entries equal to their default are
/// omitted before canonicalization.
#[derive(Debug, Default)]
pub struct DefaultTable {
    map: FxHashMap<(u8, u32), BlockValue>,
}

impl DefaultTable {
    /// The standard defaults for the builtin element types.
    pub fn standard() -> Self {
        use property_ids::*;
        let mut map = FxHashMap::default();
        for tag in 0u8..=5 {
            map.insert((tag, VISIBLE), BlockValue::Bool(true));
            map.insert((tag, OPACITY), BlockValue::Float(1.0));
            map.insert((tag, PADDING), BlockValue::Int(0));
            map.insert((tag, MARGIN), BlockValue::Int(0));
        }
        // Interactive elements are enabled unless stated otherwise.
        for tag in [3u8, 4] {
            map.insert((tag, ENABLED), BlockValue::Bool(true));
        }
        Self { map }
    }

    /// Empty table (no default elimination). Useful in tests.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register or override a default.
    pub fn set(&mut self, element_tag: u8, property_id: u32, value: BlockValue) {
        self.map.insert((element_tag, property_id), value);
    }

    pub fn get(&self, element_tag: u8, property_id: u32) -> Option<&BlockValue> {
        self.map.get(&(element_tag, property_id))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Build-side deduplicating block store.
#[derive(Debug)]
pub struct PropertyBlockBuilder {
    defaults: DefaultTable,
    /// Canonical encoded blocks, append-only.
    blocks: Vec<Vec<u8>>,
    /// xxh3(canonical bytes) -> candidate indices; exact byte equality
    /// disambiguates hash collisions.
    by_hash: FxHashMap<u64, Vec<u32>>,
}

impl PropertyBlockBuilder {
    pub fn new(defaults: DefaultTable) -> Self {
        Self {
            defaults,
            blocks: Vec::new(),
            by_hash: FxHashMap::default(),
        }
    }

    /// Canonicalize `entries` for an element of type `element_tag` and
    /// return the shared block reference, storing a new block only for
    /// previously unseen canonical sequences.
    ///
    /// Property ids unknown to the target format version are rejected in
    /// strict mode and dropped with a diagnostic otherwise — the policy
    /// comes from the negotiator's capability set, not from this module.
    pub fn build(
        &mut self,
        element_tag: u8,
        entries: &[BlockEntry],
        caps: &FeatureCapabilitySet,
        strict: bool,
        diags: &mut Diagnostics,
    ) -> Result<BlockRef> {
        let mut kept: Vec<&BlockEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !caps.knows_property_id(entry.property_id) {
                if strict {
                    return Err(Error::Encoding(format!(
                        "property id {} unknown to format version {}",
                        entry.property_id,
                        caps.version()
                    )));
                }
                diags.push(Diagnostic::DroppedProperty {
                    property_id: entry.property_id,
                });
                continue;
            }
            // Default-value elimination against the static table.
            if self.defaults.get(element_tag, entry.property_id) == Some(&entry.value) {
                continue;
            }
            kept.push(entry);
        }

        kept.sort_by(|a, b| {
            a.property_id
                .cmp(&b.property_id)
                .then(a.value.type_tag().cmp(&b.value.type_tag()))
        });

        let bytes = encode_block(&kept);
        Ok(self.insert_canonical(bytes))
    }

    /// Insert an already-canonical encoded block, deduplicating.
    fn insert_canonical(&mut self, bytes: Vec<u8>) -> BlockRef {
        let hash = xxh3_64(&bytes);
        if let Some(candidates) = self.by_hash.get(&hash) {
            for &idx in candidates {
                if self.blocks[idx as usize] == bytes {
                    return BlockRef(idx);
                }
            }
        }
        let idx = self.blocks.len() as u32;
        self.blocks.push(bytes);
        self.by_hash.entry(hash).or_default().push(idx);
        BlockRef(idx)
    }

    /// Merge another builder's blocks, re-running dedup lookups.
    ///
    /// `string_remap` maps the other builder's string indices into this
    /// build's interner (from [`crate::intern::StringInterner::merge`]).
    /// Returns the block remap table.
    pub fn merge(
        &mut self,
        other: &PropertyBlockBuilder,
        string_remap: &[StringIndex],
    ) -> Result<Vec<BlockRef>> {
        let mut remap = Vec::with_capacity(other.blocks.len());
        for bytes in &other.blocks {
            let mut entries = decode_block(bytes)?;
            for entry in &mut entries {
                if let BlockValue::Str(idx) = &mut entry.value {
                    *idx = *string_remap.get(idx.0 as usize).ok_or_else(|| {
                        Error::Encoding(format!("string index {} missing from remap", idx.0))
                    })?;
                }
            }
            let refs: Vec<&BlockEntry> = entries.iter().collect();
            remap.push(self.insert_canonical(encode_block(&refs)));
        }
        Ok(remap)
    }

    /// Number of distinct stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Serialize the block section:
    /// `[block_count: varint][offsets: u32 LE * count][records]`,
    /// offsets relative to the start of the records area.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        encode_varint(self.blocks.len() as u32, &mut out);
        let mut offset = 0u32;
        for block in &self.blocks {
            out.extend_from_slice(&offset.to_le_bytes());
            offset += block.len() as u32;
        }
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }
}

// =============================================================================
// Block codec
// =============================================================================

/// Encode a canonical (sorted, default-eliminated) entry sequence.
fn encode_block(entries: &[&BlockEntry]) -> Vec<u8> {
    let bool_count = entries
        .iter()
        .filter(|e| matches!(e.value, BlockValue::Bool(_)))
        .count();
    let pack_bools = bool_count >= 2;

    let mut buf = Vec::with_capacity(entries.len() * 4);
    let inline: Vec<&&BlockEntry> = entries
        .iter()
        .filter(|e| !pack_bools || !matches!(e.value, BlockValue::Bool(_)))
        .collect();

    encode_varint(inline.len() as u32, &mut buf);
    for entry in inline {
        encode_varint(entry.property_id, &mut buf);
        buf.push(entry.value.type_tag() as u8);
        match &entry.value {
            BlockValue::Str(idx) => encode_varint(idx.0, &mut buf),
            BlockValue::Int(v) => encode_varint64(zigzag_encode(*v), &mut buf),
            BlockValue::Float(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            BlockValue::Color(c) => buf.extend_from_slice(&c.to_bytes()),
            BlockValue::Bool(v) => buf.push(u8::from(*v)),
            BlockValue::Enum(v) | BlockValue::StyleRef(v) | BlockValue::VarRef(v) => {
                encode_varint(*v, &mut buf)
            }
        }
    }

    if pack_bools {
        let bools: Vec<(u32, bool)> = entries
            .iter()
            .filter_map(|e| match e.value {
                BlockValue::Bool(v) => Some((e.property_id, v)),
                _ => None,
            })
            .collect();
        encode_varint(bools.len() as u32, &mut buf);
        for (id, _) in &bools {
            encode_varint(*id, &mut buf);
        }
        let mut bitmap = vec![0u8; bools.len().div_ceil(8)];
        for (i, (_, v)) in bools.iter().enumerate() {
            if *v {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.extend_from_slice(&bitmap);
    } else {
        encode_varint(0, &mut buf);
    }

    buf
}

/// Decode a canonical block back into its entry sequence (canonical order:
/// inline entries first, then packed booleans by property id).
pub fn decode_block(data: &[u8]) -> Result<Vec<BlockEntry>> {
    let mut pos = 0;
    let inline_count = decode_varint(data, &mut pos)? as usize;
    let mut entries = Vec::with_capacity(inline_count);
    for _ in 0..inline_count {
        let property_id = decode_varint(data, &mut pos)?;
        let tag_byte = *data.get(pos).ok_or(Error::UnexpectedEof {
            offset: pos,
            need: 1,
            context: "property type tag",
        })?;
        pos += 1;
        let tag = TypeTag::from_u8(tag_byte).ok_or_else(|| {
            Error::Corruption(format!("unknown property type tag {tag_byte:#04x}"))
        })?;
        let value = match tag {
            TypeTag::Str => BlockValue::Str(StringIndex(decode_varint(data, &mut pos)?)),
            TypeTag::Int => BlockValue::Int(zigzag_decode(decode_varint64(data, &mut pos)?)),
            TypeTag::Float => {
                let bytes = take(data, &mut pos, 4, "float value")?;
                BlockValue::Float(f32::from_bits(u32::from_le_bytes(
                    bytes.try_into().unwrap(),
                )))
            }
            TypeTag::Color => {
                let bytes = take(data, &mut pos, 4, "color value")?;
                BlockValue::Color(Color::from_bytes(bytes.try_into().unwrap()))
            }
            TypeTag::Bool => {
                let b = take(data, &mut pos, 1, "bool value")?;
                BlockValue::Bool(b[0] != 0)
            }
            TypeTag::Enum => BlockValue::Enum(decode_varint(data, &mut pos)?),
            TypeTag::StyleRef => BlockValue::StyleRef(decode_varint(data, &mut pos)?),
            TypeTag::VarRef => BlockValue::VarRef(decode_varint(data, &mut pos)?),
        };
        entries.push(BlockEntry { property_id, value });
    }

    let packed_count = decode_varint(data, &mut pos)? as usize;
    if packed_count > 0 {
        let mut ids = Vec::with_capacity(packed_count);
        for _ in 0..packed_count {
            ids.push(decode_varint(data, &mut pos)?);
        }
        let bitmap = take(data, &mut pos, packed_count.div_ceil(8), "bool bitmap")?;
        for (i, id) in ids.into_iter().enumerate() {
            let v = bitmap[i / 8] & (1 << (i % 8)) != 0;
            entries.push(BlockEntry {
                property_id: id,
                value: BlockValue::Bool(v),
            });
        }
    }

    Ok(entries)
}

/// The block section reader: offset-indexed access into the records area.
#[derive(Debug)]
pub struct BlockSection {
    offsets: Vec<u32>,
    records_start: usize,
    section_len: usize,
}

impl BlockSection {
    /// Index the section without decoding any block.
    pub fn index(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let count = decode_varint(data, &mut pos)? as usize;
        let table_len = count
            .checked_mul(4)
            .ok_or_else(|| Error::Corruption("block count overflows offset table".into()))?;
        if pos + table_len > data.len() {
            return Err(Error::UnexpectedEof {
                offset: pos,
                need: table_len,
                context: "block offset table",
            });
        }
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let p = pos + i * 4;
            offsets.push(u32::from_le_bytes(data[p..p + 4].try_into().unwrap()));
        }
        Ok(Self {
            offsets,
            records_start: pos + table_len,
            section_len: data.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Decode the block at `block_ref` from the section bytes this index was
    /// built over.
    pub fn decode(&self, data: &[u8], block_ref: BlockRef) -> Result<Vec<BlockEntry>> {
        let i = block_ref.0 as usize;
        let start = *self.offsets.get(i).ok_or_else(|| {
            Error::Corruption(format!(
                "block ref {} out of range (section has {} blocks)",
                block_ref.0,
                self.offsets.len()
            ))
        })? as usize;
        let end = self
            .offsets
            .get(i + 1)
            .map(|&o| o as usize)
            .unwrap_or(self.section_len - self.records_start);
        let records = &data[self.records_start..];
        if start > end || end > records.len() {
            return Err(Error::Corruption(format!(
                "block {} range {start}..{end} exceeds records area",
                block_ref.0
            )));
        }
        decode_block(&records[start..end])
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, need: usize, context: &'static str) -> Result<&'a [u8]> {
    if *pos + need > data.len() {
        return Err(Error::UnexpectedEof {
            offset: *pos,
            need,
            context,
        });
    }
    let out = &data[*pos..*pos + need];
    *pos += need;
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================
