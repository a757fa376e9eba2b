//! Encoder: turns an [`IrTree`] into the binary document stream.
//!
//! Pipeline, in order:
//! 1. intern every string-valued property into the shared string table;
//! 2. canonicalize and deduplicate each node's properties into blocks;
//! 3. compress the tree structurally (repeated subtrees become templates);
//! 4. serialize the four sections, then backpatch the directory and header.
//!
//! Encoding is deterministic: the same tree and options always produce
//! byte-identical output. Nothing here depends on hash iteration order —
//! strings and blocks are numbered by first appearance, and the template
//! selection walks nodes in arena order.

use std::path::Path;

use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::format::sections::{encode_template_section, encode_tree_section, is_compressed};
use crate::format::{
    write_directory, Compression, FileHeader, SectionEntry, SectionId, DIRECTORY_LEN,
    FLAG_COMPRESSED, FLAG_DEBUG_INFO, HEADER_LEN, MIN_DOC_LEN,
};
use crate::intern::StringInterner;
use crate::ir::{IrTree, NodeId, PropertyValue};
use crate::props::{BlockEntry, BlockValue, DefaultTable, PropertyBlockBuilder};
use crate::template::{compress, CompressorConfig};
use crate::version::{capabilities, Feature, CURRENT_VERSION};

/// Knobs for one encode pass.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Compression strategy for the compressible sections (string table and
    /// element tree). Applied only where it actually shrinks the payload.
    pub compression: Compression,
    /// Structural optimization level, 0..=3. Level 0 disables the template
    /// pass entirely; higher levels lower the extraction threshold.
    pub optimization: u8,
    /// Strict mode fails the encode on properties or element tags unknown
    /// to the target format version; lenient mode drops them with a
    /// diagnostic.
    pub strict: bool,
    /// Set the debug-info header flag (source span payloads are attached by
    /// tooling downstream of the core encoder).
    pub debug_info: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            optimization: 2,
            strict: true,
            debug_info: false,
        }
    }
}

/// Result of a successful encode.
#[derive(Debug)]
pub struct EncodeOutput {
    pub bytes: Vec<u8>,
    /// Degradations applied in lenient mode (empty in strict mode).
    pub diagnostics: Diagnostics,
}

/// Encode `tree` into a complete binary document.
pub fn encode(tree: &IrTree, options: &EncodeOptions) -> Result<EncodeOutput> {
    if tree.is_empty() {
        return Err(Error::Encoding("cannot encode an empty tree".into()));
    }
    let caps = capabilities(CURRENT_VERSION);
    let mut diags = Diagnostics::new();

    let mut interner = if caps.supports(Feature::SuffixFactoring) {
        StringInterner::new()
    } else {
        StringInterner::without_factoring()
    };
    let mut builder = PropertyBlockBuilder::new(DefaultTable::standard());

    // Per-node block refs, indexed by arena position.
    let mut blocks = Vec::with_capacity(tree.len());
    for i in 0..tree.len() {
        let node = tree.node(NodeId(i as u32));
        let tag = node.element_type.tag();
        if !caps.knows_element_tag(tag) {
            return Err(Error::Encoding(format!(
                "element tag {tag:#04x} is not defined for format version {CURRENT_VERSION}"
            )));
        }
        let mut entries = Vec::with_capacity(node.properties.len());
        for prop in &node.properties {
            entries.push(BlockEntry {
                property_id: prop.property_id,
                value: intern_value(&prop.value, &mut interner),
            });
        }
        blocks.push(builder.build(tag, &entries, &caps, options.strict, &mut diags)?);
    }

    let config = CompressorConfig::for_level(options.optimization);
    let (templates, root) = compress(tree, &blocks, &config);

    let string_section = interner.serialize(options.compression);
    let block_section = builder.serialize();
    let template_section = encode_template_section(&templates);
    let tree_section = encode_tree_section(&root, options.compression);

    tracing::debug!(
        strings = string_section.len(),
        blocks = block_section.len(),
        templates = template_section.len(),
        tree = tree_section.len(),
        "encoded sections"
    );

    let bytes = assemble(
        options,
        &string_section,
        &block_section,
        &template_section,
        &tree_section,
    )?;

    Ok(EncodeOutput { bytes, diagnostics: diags })
}

/// Encode and write the document to `path` in one shot. The stream is staged
/// fully in memory first, so a failed encode never leaves a partial file.
pub fn encode_to_path(
    tree: &IrTree,
    options: &EncodeOptions,
    path: impl AsRef<Path>,
) -> Result<Diagnostics> {
    let output = encode(tree, options)?;
    std::fs::write(path, &output.bytes)?;
    Ok(output.diagnostics)
}

fn intern_value(value: &PropertyValue, interner: &mut StringInterner) -> BlockValue {
    match value {
        PropertyValue::Str(s) => BlockValue::Str(interner.intern(s)),
        PropertyValue::Int(v) => BlockValue::Int(*v),
        PropertyValue::Float(v) => BlockValue::Float(*v),
        PropertyValue::Color(c) => BlockValue::Color(*c),
        PropertyValue::Bool(b) => BlockValue::Bool(*b),
        PropertyValue::Enum(v) => BlockValue::Enum(*v),
        PropertyValue::StyleRef(v) => BlockValue::StyleRef(*v),
        PropertyValue::VarRef(v) => BlockValue::VarRef(*v),
    }
}

/// Stage header + directory + sections, then backpatch the directory, total
/// size, and finally the checksum (which covers everything else).
fn assemble(
    options: &EncodeOptions,
    string_section: &[u8],
    block_section: &[u8],
    template_section: &[u8],
    tree_section: &[u8],
) -> Result<Vec<u8>> {
    let sections: [(SectionId, &[u8]); 4] = [
        (SectionId::StringTable, string_section),
        (SectionId::PropertyBlocks, block_section),
        (SectionId::Templates, template_section),
        (SectionId::ElementTree, tree_section),
    ];

    let total: usize = MIN_DOC_LEN + sections.iter().map(|(_, s)| s.len()).sum::<usize>();
    if total > u32::MAX as usize {
        return Err(Error::Encoding(format!(
            "document size {total} exceeds the 4 GiB format limit"
        )));
    }

    let mut buf = Vec::with_capacity(total);
    buf.resize(MIN_DOC_LEN, 0);

    let mut entries = [SectionEntry {
        id: SectionId::StringTable,
        offset: 0,
        length: 0,
    }; 4];
    for (i, (id, data)) in sections.iter().enumerate() {
        entries[i] = SectionEntry {
            id: *id,
            offset: buf.len() as u32,
            length: data.len() as u32,
        };
        buf.extend_from_slice(data);
    }
    write_directory(&mut buf, HEADER_LEN, &entries);
    debug_assert_eq!(HEADER_LEN + DIRECTORY_LEN, MIN_DOC_LEN);

    let mut flags = 0u16;
    if is_compressed(string_section) || is_compressed(tree_section) {
        flags |= FLAG_COMPRESSED;
    }
    if options.debug_info {
        flags |= FLAG_DEBUG_INFO;
    }

    // Checksum is computed over the finished stream with its own field
    // zeroed, so write the header with checksum 0 first.
    let mut header = FileHeader {
        version: CURRENT_VERSION,
        flags,
        total_size: buf.len() as u32,
        checksum: 0,
    };
    header.write_to(&mut buf);
    header.checksum = crate::format::stream_checksum(&buf);
    header.write_to(&mut buf);

    Ok(buf)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{stream_checksum, CHECKSUM_RANGE, MAGIC};
    use crate::ir::{Color, ElementType, PropertyEntry};
    use crate::props::property_ids;

    fn sample_tree() -> IrTree {
        let mut tree = IrTree::new(ElementType::Root, vec![]);
        let list = tree.add_child(tree.root(), ElementType::Container, vec![]);
        for _ in 0..3 {
            tree.add_child(
                list,
                ElementType::Button,
                vec![
                    PropertyEntry::new(
                        property_ids::BACKGROUND_COLOR,
                        PropertyValue::Color(Color::from_rgba_u32(0x007B_FFFF)),
                    ),
                    PropertyEntry::new(property_ids::PADDING, PropertyValue::Int(12)),
                ],
            );
        }
        tree.add_child(
            list,
            ElementType::Text,
            vec![PropertyEntry::new(
                property_ids::TEXT,
                PropertyValue::Str("hello".into()),
            )],
        );
        tree
    }

    #[test]
    fn test_encode_produces_valid_header() {
        let out = encode(&sample_tree(), &EncodeOptions::default()).unwrap();
        assert_eq!(&out.bytes[0..4], &MAGIC);
        assert_eq!(out.bytes[4], CURRENT_VERSION.major);
        assert_eq!(out.bytes[5], CURRENT_VERSION.minor);
        let total = u32::from_le_bytes(out.bytes[8..12].try_into().unwrap());
        assert_eq!(total as usize, out.bytes.len());
        let checksum = u32::from_le_bytes(
            out.bytes[CHECKSUM_RANGE].try_into().unwrap(),
        );
        assert_eq!(checksum, stream_checksum(&out.bytes));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let tree = sample_tree();
        let opts = EncodeOptions::default();
        let a = encode(&tree, &opts).unwrap();
        let b = encode(&tree, &opts).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_single_node_tree_encodes() {
        let tree = IrTree::new(ElementType::Root, vec![]);
        assert!(encode(&tree, &EncodeOptions::default()).is_ok());
    }

    #[test]
    fn test_strict_rejects_unknown_property() {
        let tree = IrTree::new(
            ElementType::Root,
            vec![PropertyEntry::new(9999, PropertyValue::Int(1))],
        );
        let err = encode(&tree, &EncodeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_lenient_drops_unknown_property() {
        let tree = IrTree::new(
            ElementType::Root,
            vec![PropertyEntry::new(9999, PropertyValue::Int(1))],
        );
        let opts = EncodeOptions {
            strict: false,
            ..EncodeOptions::default()
        };
        let out = encode(&tree, &opts).unwrap();
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn test_uncompressed_option_clears_flag() {
        let opts = EncodeOptions {
            compression: Compression::None,
            ..EncodeOptions::default()
        };
        let out = encode(&sample_tree(), &opts).unwrap();
        let flags = u16::from_le_bytes(out.bytes[6..8].try_into().unwrap());
        assert_eq!(flags & FLAG_COMPRESSED, 0);
    }
}
