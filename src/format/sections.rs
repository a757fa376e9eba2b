//! Per-section wire codecs for the template table and the element tree.
//!
//! Element tree section (optionally zstd-compressed as a whole):
//! ```text
//! tree     := [scheme: u8][uncompressed_len: varint, if scheme != 0][payload]
//! payload  := [node_count: varint][offsets: u32 LE * count][records]
//! record   := [tag: u8][block_ref: varint][child_count: varint] child*
//! child    := [kind: u8][index: varint]   kind 0 = node index, 1 = template index
//! ```
//! Node indices are preorder; node 0 is the root. Offsets are relative to
//! the records area so a node can be materialized without parsing the ones
//! before it.
//!
//! Template section (never compressed — entries are small and accessed
//! individually):
//! ```text
//! templates := [template_count: varint][offsets: u32 LE * count][bodies]
//! body      := [tag: u8][block_ref: varint][child_count: varint] tchild*
//! tchild    := [kind: u8] kind 0 = inline body follows, 1 = [index: varint]
//! ```
//! Template references inside a body always point at strictly lower indices;
//! the decoder enforces that, which makes the table acyclic.

use crate::error::{Error, Result};
use crate::format::Compression;
use crate::template::{ChildRef, TemplateTable, TreeNode};
use crate::varint::{decode_varint, encode_varint};

const CHILD_NODE: u8 = 0;
const CHILD_TEMPLATE: u8 = 1;

const TCHILD_INLINE: u8 = 0;
const TCHILD_TEMPLATE: u8 = 1;

/// Parse depth guard for recursive template bodies in corrupt input.
const MAX_TEMPLATE_DEPTH: usize = 64;

// =============================================================================
// Raw decoded structures
// =============================================================================

/// A structurally-decoded node, before property/string resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNode {
    pub tag: u8,
    pub block_ref: u32,
    pub children: Vec<RawChild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChild {
    /// Index into the element tree section's node records.
    Node(u32),
    /// Index into the template table.
    Template(u32),
    /// Inline child of a template body.
    Inline(Box<RawNode>),
}

// =============================================================================
// Element tree section
// =============================================================================

/// Flatten the compressed root into preorder node records and encode the
/// section, compressing the payload when that actually shrinks it.
pub fn encode_tree_section(root: &TreeNode, compression: Compression) -> Vec<u8> {
    // Preorder flatten: each inline node becomes a record whose children
    // are node indices or template refs.
    struct Flat {
        records: Vec<Vec<u8>>,
    }
    impl Flat {
        fn flatten(&mut self, node: &TreeNode) -> u32 {
            let idx = self.records.len() as u32;
            self.records.push(Vec::new());

            let mut child_slots = Vec::with_capacity(node.children.len());
            for child in &node.children {
                match child {
                    ChildRef::Inline(n) => child_slots.push((CHILD_NODE, self.flatten(n))),
                    ChildRef::Template(t) => child_slots.push((CHILD_TEMPLATE, *t)),
                }
            }

            let mut rec = Vec::with_capacity(4 + 3 * child_slots.len());
            rec.push(node.tag);
            encode_varint(node.block.0, &mut rec);
            encode_varint(child_slots.len() as u32, &mut rec);
            for (kind, index) in child_slots {
                rec.push(kind);
                encode_varint(index, &mut rec);
            }
            self.records[idx as usize] = rec;
            idx
        }
    }

    let mut flat = Flat {
        records: Vec::new(),
    };
    flat.flatten(root);

    let mut payload = Vec::with_capacity(64);
    encode_varint(flat.records.len() as u32, &mut payload);
    let mut offset = 0u32;
    for rec in &flat.records {
        payload.extend_from_slice(&offset.to_le_bytes());
        offset += rec.len() as u32;
    }
    for rec in &flat.records {
        payload.extend_from_slice(rec);
    }

    wrap_compressible(payload, compression)
}

/// Index into the element tree section: node count + offsets, no record
/// parsed yet. Owns the (possibly decompressed) payload.
#[derive(Debug)]
pub struct TreeSection {
    payload: Vec<u8>,
    offsets: Vec<u32>,
    records_start: usize,
}

impl TreeSection {
    /// Decompress (if needed) and index the section.
    pub fn index(data: &[u8]) -> Result<Self> {
        let payload = unwrap_compressible(data, "element tree")?;
        let mut pos = 0;
        let count = decode_varint(&payload, &mut pos)? as usize;
        let table_len = count
            .checked_mul(4)
            .ok_or_else(|| Error::Corruption("node count overflows offset table".into()))?;
        if pos + table_len > payload.len() {
            return Err(Error::UnexpectedEof {
                offset: pos,
                need: table_len,
                context: "tree offset table",
            });
        }
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let p = pos + i * 4;
            offsets.push(u32::from_le_bytes(payload[p..p + 4].try_into().unwrap()));
        }
        Ok(Self {
            payload,
            offsets,
            records_start: pos + table_len,
        })
    }

    /// Number of node records in the section.
    pub fn node_count(&self) -> usize {
        self.offsets.len()
    }

    /// Structurally decode the node record at `index`.
    pub fn raw_node(&self, index: u32) -> Result<RawNode> {
        let i = index as usize;
        let start = *self.offsets.get(i).ok_or_else(|| {
            Error::Corruption(format!(
                "node index {index} out of range (tree has {} nodes)",
                self.offsets.len()
            ))
        })? as usize;
        let records = &self.payload[self.records_start..];
        let end = self
            .offsets
            .get(i + 1)
            .map(|&o| o as usize)
            .unwrap_or(records.len());
        if start > end || end > records.len() {
            return Err(Error::Corruption(format!(
                "node {index} range {start}..{end} exceeds records area"
            )));
        }
        let rec = &records[start..end];

        let mut pos = 0;
        let tag = *rec.first().ok_or(Error::UnexpectedEof {
            offset: 0,
            need: 1,
            context: "node tag",
        })?;
        pos += 1;
        let block_ref = decode_varint(rec, &mut pos)?;
        let child_count = decode_varint(rec, &mut pos)? as usize;
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            let kind = *rec.get(pos).ok_or(Error::UnexpectedEof {
                offset: pos,
                need: 1,
                context: "child kind",
            })?;
            pos += 1;
            let child_index = decode_varint(rec, &mut pos)?;
            children.push(match kind {
                CHILD_NODE => RawChild::Node(child_index),
                CHILD_TEMPLATE => RawChild::Template(child_index),
                other => {
                    return Err(Error::Corruption(format!(
                        "unknown child kind {other:#04x} in node {index}"
                    )))
                }
            });
        }
        Ok(RawNode {
            tag,
            block_ref,
            children,
        })
    }
}

// =============================================================================
// Template section
// =============================================================================

/// Encode the template table with an offset index for random access.
pub fn encode_template_section(table: &TemplateTable) -> Vec<u8> {
    fn encode_body(node: &TreeNode, buf: &mut Vec<u8>) {
        buf.push(node.tag);
        encode_varint(node.block.0, buf);
        encode_varint(node.children.len() as u32, buf);
        for child in &node.children {
            match child {
                ChildRef::Inline(n) => {
                    buf.push(TCHILD_INLINE);
                    encode_body(n, buf);
                }
                ChildRef::Template(t) => {
                    buf.push(TCHILD_TEMPLATE);
                    encode_varint(*t, buf);
                }
            }
        }
    }

    let bodies: Vec<Vec<u8>> = table
        .templates
        .iter()
        .map(|t| {
            let mut buf = Vec::with_capacity(16);
            encode_body(t, &mut buf);
            buf
        })
        .collect();

    let mut out = Vec::with_capacity(64);
    encode_varint(bodies.len() as u32, &mut out);
    let mut offset = 0u32;
    for body in &bodies {
        out.extend_from_slice(&offset.to_le_bytes());
        offset += body.len() as u32;
    }
    for body in &bodies {
        out.extend_from_slice(body);
    }
    out
}

/// Index into the template section.
#[derive(Debug)]
pub struct TemplateSection {
    offsets: Vec<u32>,
    records_start: usize,
}

impl TemplateSection {
    pub fn index(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let count = decode_varint(data, &mut pos)? as usize;
        let table_len = count
            .checked_mul(4)
            .ok_or_else(|| Error::Corruption("template count overflows offset table".into()))?;
        if pos + table_len > data.len() {
            return Err(Error::UnexpectedEof {
                offset: pos,
                need: table_len,
                context: "template offset table",
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
        })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// An empty section for lenient-mode degradation.
    pub fn empty() -> Self {
        Self {
            offsets: Vec::new(),
            records_start: 0,
        }
    }

    /// Structurally decode the template body at `index` from the section
    /// bytes. Nested template references must point below `index`.
    pub fn raw_template(&self, data: &[u8], index: u32) -> Result<RawNode> {
        let i = index as usize;
        let start = *self.offsets.get(i).ok_or_else(|| {
            Error::Corruption(format!(
                "template index {index} out of range (table has {} entries)",
                self.offsets.len()
            ))
        })? as usize;
        let records = &data[self.records_start..];
        let end = self
            .offsets
            .get(i + 1)
            .map(|&o| o as usize)
            .unwrap_or(records.len());
        if start > end || end > records.len() {
            return Err(Error::Corruption(format!(
                "template {index} range {start}..{end} exceeds records area"
            )));
        }
        let body = &records[start..end];
        let mut pos = 0;
        let node = decode_body(body, &mut pos, index, 0)?;
        Ok(node)
    }
}

fn decode_body(data: &[u8], pos: &mut usize, own_index: u32, depth: usize) -> Result<RawNode> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(Error::Corruption(format!(
            "template {own_index} nests deeper than {MAX_TEMPLATE_DEPTH}"
        )));
    }
    let tag = *data.get(*pos).ok_or(Error::UnexpectedEof {
        offset: *pos,
        need: 1,
        context: "template node tag",
    })?;
    *pos += 1;
    let block_ref = decode_varint(data, pos)?;
    let child_count = decode_varint(data, pos)? as usize;
    let mut children = Vec::with_capacity(child_count);
    for _ in 0..child_count {
        let kind = *data.get(*pos).ok_or(Error::UnexpectedEof {
            offset: *pos,
            need: 1,
            context: "template child kind",
        })?;
        *pos += 1;
        match kind {
            TCHILD_INLINE => {
                children.push(RawChild::Inline(Box::new(decode_body(
                    data,
                    pos,
                    own_index,
                    depth + 1,
                )?)));
            }
            TCHILD_TEMPLATE => {
                let t = decode_varint(data, pos)?;
                // Acyclicity: only strictly lower indices may be referenced.
                if t >= own_index {
                    return Err(Error::Corruption(format!(
                        "template {own_index} references template {t} (must be lower)"
                    )));
                }
                children.push(RawChild::Template(t));
            }
            other => {
                return Err(Error::Corruption(format!(
                    "unknown template child kind {other:#04x}"
                )))
            }
        }
    }
    Ok(RawNode {
        tag,
        block_ref,
        children,
    })
}

// =============================================================================
// Compressible payload wrapper
// =============================================================================

/// Wrap a payload with a scheme byte, compressing when that shrinks it.
fn wrap_compressible(payload: Vec<u8>, compression: Compression) -> Vec<u8> {
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
    out.extend(payload);
    out
}

/// Reverse of [`wrap_compressible`].
fn unwrap_compressible(data: &[u8], what: &str) -> Result<Vec<u8>> {
    let scheme_byte = *data.first().ok_or(Error::UnexpectedEof {
        offset: 0,
        need: 1,
        context: "section scheme",
    })?;
    let scheme = Compression::from_scheme_byte(scheme_byte)
        .ok_or_else(|| Error::Corruption(format!("unknown {what} scheme {scheme_byte:#04x}")))?;
    let mut pos = 1;
    if scheme == Compression::None {
        return Ok(data[pos..].to_vec());
    }
    let uncompressed_len = decode_varint(data, &mut pos)? as usize;
    let payload = zstd::decode_all(&data[pos..])
        .map_err(|e| Error::Resource(format!("{what} decompression failed: {e}")))?;
    if payload.len() != uncompressed_len {
        return Err(Error::Corruption(format!(
            "{what} decompressed to {} bytes, header says {uncompressed_len}",
            payload.len()
        )));
    }
    Ok(payload)
}

/// Whether a section payload was written compressed (drives the header
/// `FLAG_COMPRESSED` bit).
pub fn is_compressed(section: &[u8]) -> bool {
    section
        .first()
        .is_some_and(|&b| b != Compression::None.scheme_byte())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::BlockRef;

    fn leaf(tag: u8, block: u32) -> TreeNode {
        TreeNode {
            tag,
            block: BlockRef(block),
            children: Vec::new(),
        }
    }

    #[test]
    fn test_tree_section_round_trip() {
        let root = TreeNode {
            tag: 0,
            block: BlockRef(0),
            children: vec![
                ChildRef::Inline(TreeNode {
                    tag: 1,
                    block: BlockRef(1),
                    children: vec![ChildRef::Inline(leaf(2, 2)), ChildRef::Template(0)],
                }),
                ChildRef::Template(0),
            ],
        };

        let bytes = encode_tree_section(&root, Compression::None);
        let section = TreeSection::index(&bytes).unwrap();
        assert_eq!(section.node_count(), 3);

        let raw_root = section.raw_node(0).unwrap();
        assert_eq!(raw_root.tag, 0);
        assert_eq!(raw_root.children.len(), 2);
        assert_eq!(raw_root.children[0], RawChild::Node(1));
        assert_eq!(raw_root.children[1], RawChild::Template(0));

        let container = section.raw_node(1).unwrap();
        assert_eq!(container.block_ref, 1);
        assert_eq!(container.children, vec![RawChild::Node(2), RawChild::Template(0)]);

        let text = section.raw_node(2).unwrap();
        assert_eq!(text.tag, 2);
        assert!(text.children.is_empty());
    }

    #[test]
    fn test_tree_section_compressed_round_trip() {
        // Enough repetitive structure for zstd to win.
        let children: Vec<ChildRef> = (0..200).map(|_| ChildRef::Inline(leaf(3, 7))).collect();
        let root = TreeNode {
            tag: 0,
            block: BlockRef(0),
            children,
        };

        let compressed = encode_tree_section(&root, Compression::Balanced);
        let plain = encode_tree_section(&root, Compression::None);
        assert!(compressed.len() < plain.len());
        assert!(is_compressed(&compressed));
        assert!(!is_compressed(&plain));

        let section = TreeSection::index(&compressed).unwrap();
        assert_eq!(section.node_count(), 201);
        assert_eq!(section.raw_node(42).unwrap(), leaf_raw(3, 7));
    }

    fn leaf_raw(tag: u8, block_ref: u32) -> RawNode {
        RawNode {
            tag,
            block_ref,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_template_section_round_trip() {
        let table = TemplateTable {
            templates: vec![
                leaf(2, 4),
                TreeNode {
                    tag: 1,
                    block: BlockRef(0),
                    children: vec![ChildRef::Template(0), ChildRef::Inline(leaf(3, 5))],
                },
            ],
        };

        let bytes = encode_template_section(&table);
        let section = TemplateSection::index(&bytes).unwrap();
        assert_eq!(section.len(), 2);

        let t0 = section.raw_template(&bytes, 0).unwrap();
        assert_eq!(t0, leaf_raw(2, 4));

        let t1 = section.raw_template(&bytes, 1).unwrap();
        assert_eq!(t1.children.len(), 2);
        assert_eq!(t1.children[0], RawChild::Template(0));
        assert_eq!(
            t1.children[1],
            RawChild::Inline(Box::new(leaf_raw(3, 5)))
        );
    }

    #[test]
    fn test_template_forward_reference_rejected() {
        // Template 0 referencing template 0 (itself) is a cycle.
        let table = TemplateTable {
            templates: vec![TreeNode {
                tag: 1,
                block: BlockRef(0),
                children: vec![ChildRef::Template(0)],
            }],
        };
        let bytes = encode_template_section(&table);
        let section = TemplateSection::index(&bytes).unwrap();
        assert!(matches!(
            section.raw_template(&bytes, 0),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_empty_template_section() {
        let bytes = encode_template_section(&TemplateTable::default());
        let section = TemplateSection::index(&bytes).unwrap();
        assert!(section.is_empty());
        assert!(section.raw_template(&bytes, 0).is_err());
    }
}
