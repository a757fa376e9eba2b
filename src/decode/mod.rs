//! Lazy document loader and read-side element model.
//!
//! Opening a document validates the envelope (header, version, checksum,
//! directory) and indexes the sections, but materializes nothing: node
//! records are parsed into [`Element`]s on first access, via a shared
//! byte-bounded cache. Template instantiation shares one materialized body
//! per template — every reference clones an `Arc`, it never re-decodes.
//!
//! Strictness is an open-time policy. Strict mode fails on checksum
//! mismatch; lenient mode records a diagnostic and proceeds best-effort.
//! Structural corruption in the tree or string table is fatal either way —
//! there is no useful document to salvage without them.

pub mod element_cache;

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Error, Result};
use crate::format::sections::{RawChild, RawNode, TemplateSection, TreeSection};
use crate::format::{read_directory, stream_checksum, FileHeader, SectionEntry, HEADER_LEN};
use crate::intern::StringTable;
use crate::ir::{Color, ElementType, PropertyEntry, PropertyValue};
use crate::props::{BlockEntry, BlockRef, BlockSection, BlockValue};
use crate::version::{capabilities, classify, Compatibility, FeatureCapabilitySet, CURRENT_VERSION};

use element_cache::{CacheKey, ElementCache};

/// Open-time policy knobs.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Fail on checksum mismatch instead of recording a diagnostic.
    pub strict: bool,
    /// Skip checksum verification entirely (trusted local files on a hot
    /// path).
    pub skip_checksum: bool,
    /// Byte budget for the materialized-element cache.
    pub max_cache_bytes: u64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strict: true,
            skip_checksum: false,
            max_cache_bytes: 16 << 20,
        }
    }
}

// =============================================================================
// Materialized element data
// =============================================================================

/// A child slot of a materialized element. Node and template slots resolve
/// through the document cache on access; direct slots are children of a
/// template body, materialized together with it.
#[derive(Debug, Clone)]
pub enum ChildSlot {
    Node(u32),
    Template(u32),
    Direct(Arc<ElementData>),
}

/// Fully materialized element: type resolved, properties decoded and
/// strings inlined. Shared via `Arc` between the cache and readers.
#[derive(Debug, Clone)]
pub struct ElementData {
    pub element_type: ElementType,
    pub properties: Vec<PropertyEntry>,
    pub children: Vec<ChildSlot>,
}

impl ElementData {
    /// Approximate heap weight for cache accounting.
    pub(crate) fn weight(&self) -> u32 {
        let mut w = std::mem::size_of::<Self>();
        w += self.children.len() * std::mem::size_of::<ChildSlot>();
        for p in &self.properties {
            w += std::mem::size_of::<PropertyEntry>();
            if let PropertyValue::Str(s) = &p.value {
                w += s.len();
            }
        }
        w.min(u32::MAX as usize) as u32
    }
}

// =============================================================================
// Shared document state
// =============================================================================

/// State shared by every element handed out from one document.
struct DocShared {
    bytes: Arc<[u8]>,
    caps: FeatureCapabilitySet,
    tree: TreeSection,
    blocks: BlockSection,
    /// Byte range of the property block section within `bytes`.
    block_range: std::ops::Range<usize>,
    templates: TemplateSection,
    /// Byte range of the template section within `bytes`.
    template_range: std::ops::Range<usize>,
    /// Byte range of the string table section within `bytes`.
    string_range: std::ops::Range<usize>,
    /// Decoded lazily on the first string-valued property.
    strings: OnceLock<StringTable>,
    cache: ElementCache,
    diagnostics: Mutex<Diagnostics>,
}

impl DocShared {
    fn strings(&self) -> Result<&StringTable> {
        if let Some(table) = self.strings.get() {
            return Ok(table);
        }
        // Decode outside the cell; a lost race just discards a duplicate.
        let table = StringTable::decode(&self.bytes[self.string_range.clone()])?;
        Ok(self.strings.get_or_init(|| table))
    }

    fn diag(&self, event: Diagnostic) {
        // Lock poisoning cannot happen: push never panics.
        if let Ok(mut d) = self.diagnostics.lock() {
            d.push(event);
        }
    }

    fn node_element(self: &Arc<Self>, index: u32) -> Result<Arc<ElementData>> {
        self.cache.get_or_materialize(CacheKey::Node(index), || {
            let raw = self.tree.raw_node(index)?;
            self.materialize(&raw, index).map(Arc::new)
        })
    }

    fn template_element(self: &Arc<Self>, index: u32) -> Result<Arc<ElementData>> {
        self.cache.get_or_materialize(CacheKey::Template(index), || {
            let raw = self
                .templates
                .raw_template(&self.bytes[self.template_range.clone()], index)?;
            self.materialize_body(&raw).map(Arc::new)
        })
    }

    /// Materialize a tree node: resolve its type and properties, keep its
    /// children lazy.
    fn materialize(&self, raw: &RawNode, node_index: u32) -> Result<ElementData> {
        let element_type = self.resolve_type(raw.tag, node_index);
        let properties = self.resolve_properties(BlockRef(raw.block_ref), node_index)?;
        let mut children = Vec::with_capacity(raw.children.len());
        for child in &raw.children {
            children.push(match child {
                RawChild::Node(i) => ChildSlot::Node(*i),
                RawChild::Template(t) => ChildSlot::Template(*t),
                // Tree records are flat; inline bodies only occur in
                // template records.
                RawChild::Inline(_) => {
                    return Err(Error::Corruption(format!(
                        "inline child in tree node {node_index}"
                    )))
                }
            });
        }
        Ok(ElementData {
            element_type,
            properties,
            children,
        })
    }

    /// Materialize a template body whole. Inline children become direct
    /// slots; nested template references stay lazy (and always point at
    /// lower indices, so resolution terminates).
    fn materialize_body(&self, raw: &RawNode) -> Result<ElementData> {
        let element_type = self.resolve_type(raw.tag, u32::MAX);
        let properties = self.resolve_properties(BlockRef(raw.block_ref), u32::MAX)?;
        let mut children = Vec::with_capacity(raw.children.len());
        for child in &raw.children {
            children.push(match child {
                RawChild::Inline(n) => ChildSlot::Direct(Arc::new(self.materialize_body(n)?)),
                RawChild::Template(t) => ChildSlot::Template(*t),
                RawChild::Node(i) => ChildSlot::Node(*i),
            });
        }
        Ok(ElementData {
            element_type,
            properties,
            children,
        })
    }

    /// Map a wire tag to an element type, degrading unknown tags to a
    /// generic container.
    fn resolve_type(&self, tag: u8, node_index: u32) -> ElementType {
        if self.caps.knows_element_tag(tag) {
            if let Some(et) = ElementType::from_tag(tag) {
                return et;
            }
        }
        self.diag(Diagnostic::UnknownElementTag { tag, node_index });
        ElementType::Container
    }

    fn resolve_properties(
        &self,
        block_ref: BlockRef,
        node_index: u32,
    ) -> Result<Vec<PropertyEntry>> {
        let entries = self
            .blocks
            .decode(&self.bytes[self.block_range.clone()], block_ref)?;
        let mut out = Vec::with_capacity(entries.len());
        for BlockEntry { property_id, value } in entries {
            if !self.caps.knows_property_id(property_id) {
                self.diag(Diagnostic::UnknownPropertyId {
                    property_id,
                    node_index,
                });
                continue;
            }
            let value = match value {
                BlockValue::Str(idx) => PropertyValue::Str(self.strings()?.get(idx)?.to_owned()),
                BlockValue::Int(v) => PropertyValue::Int(v),
                BlockValue::Float(v) => PropertyValue::Float(v),
                BlockValue::Color(c) => PropertyValue::Color(c),
                BlockValue::Bool(b) => PropertyValue::Bool(b),
                BlockValue::Enum(v) => PropertyValue::Enum(v),
                BlockValue::StyleRef(v) => PropertyValue::StyleRef(v),
                BlockValue::VarRef(v) => PropertyValue::VarRef(v),
            };
            out.push(PropertyEntry { property_id, value });
        }
        Ok(out)
    }
}

// =============================================================================
// Public document handle
// =============================================================================

/// An opened binary UI document. Cheap to clone handles out of; elements
/// are materialized on demand and cached.
pub struct BinaryDocument {
    shared: Arc<DocShared>,
}

impl BinaryDocument {
    /// Validate the envelope and index the sections. No element is decoded
    /// yet.
    pub fn open(bytes: impl Into<Arc<[u8]>>, options: &DecodeOptions) -> Result<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let mut diags = Diagnostics::new();

        let header = FileHeader::read_from(&bytes)?;
        if header.total_size as usize != bytes.len() {
            return Err(Error::Corruption(format!(
                "header declares {} bytes, stream has {}",
                header.total_size,
                bytes.len()
            )));
        }

        match classify(header.version, CURRENT_VERSION) {
            Compatibility::Unsupported => {
                return Err(Error::Format(format!(
                    "format version {} is not readable by runtime {}",
                    header.version, CURRENT_VERSION
                )));
            }
            Compatibility::SupportedWithDegradation(features) => {
                for f in features {
                    diags.push(Diagnostic::MissingFeature { feature: f.name() });
                }
            }
            Compatibility::FullySupported => {}
        }

        if !options.skip_checksum {
            let actual = stream_checksum(&bytes);
            if actual != header.checksum {
                if options.strict {
                    return Err(Error::ChecksumMismatch {
                        expected: header.checksum,
                        actual,
                    });
                }
                diags.push(Diagnostic::ChecksumIgnored {
                    expected: header.checksum,
                    actual,
                });
            }
        }

        // Canonical order is enforced by read_directory.
        let directory = read_directory(&bytes, HEADER_LEN, bytes.len())?;
        let range_of = |e: SectionEntry| -> std::ops::Range<usize> {
            e.offset as usize..(e.offset + e.length) as usize
        };
        let string_range = range_of(directory[0]);
        let block_range = range_of(directory[1]);
        let template_range = range_of(directory[2]);
        let tree_range = range_of(directory[3]);

        let tree = TreeSection::index(&bytes[tree_range])?;
        let blocks = BlockSection::index(&bytes[block_range.clone()])?;
        let templates = match TemplateSection::index(&bytes[template_range.clone()]) {
            Ok(t) => t,
            Err(e) if !options.strict => {
                tracing::warn!("template section unreadable, degrading: {e}");
                diags.push(Diagnostic::MissingFeature {
                    feature: "subtree-templates",
                });
                TemplateSection::empty()
            }
            Err(e) => return Err(e),
        };

        if tree.node_count() == 0 {
            return Err(Error::Corruption("element tree has no nodes".into()));
        }

        let caps = capabilities(header.version);
        tracing::debug!(
            version = %header.version,
            nodes = tree.node_count(),
            templates = templates.len(),
            "opened document"
        );

        Ok(Self {
            shared: Arc::new(DocShared {
                bytes,
                caps,
                tree,
                blocks,
                block_range,
                templates,
                template_range,
                string_range,
                strings: OnceLock::new(),
                cache: ElementCache::new(options.max_cache_bytes),
                diagnostics: Mutex::new(diags),
            }),
        })
    }

    /// Read and open a document from disk.
    pub fn open_path(path: impl AsRef<Path>, options: &DecodeOptions) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::open(bytes.into_boxed_slice(), options)
    }

    /// Materialize (or fetch from cache) the root element.
    pub fn root(&self) -> Result<Element> {
        let data = self.shared.node_element(0)?;
        Ok(Element {
            doc: Arc::clone(&self.shared),
            data,
        })
    }

    /// Number of node records in the element tree section.
    pub fn node_count(&self) -> usize {
        self.shared.tree.node_count()
    }

    /// Number of entries in the template table.
    pub fn template_count(&self) -> usize {
        self.shared.templates.len()
    }

    /// Whether the node at `index` is currently materialized in the cache.
    pub fn is_materialized(&self, index: u32) -> bool {
        self.shared.cache.contains(CacheKey::Node(index))
    }

    /// Snapshot of the degradation events recorded so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.shared
            .diagnostics
            .lock()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for BinaryDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryDocument")
            .field("nodes", &self.shared.tree.node_count())
            .field("templates", &self.shared.templates.len())
            .field("cached", &self.shared.cache.entry_count())
            .finish()
    }
}

// =============================================================================
// Element handle
// =============================================================================

/// A materialized element plus the document context needed to resolve its
/// children. Clones share the underlying data.
#[derive(Clone)]
pub struct Element {
    doc: Arc<DocShared>,
    data: Arc<ElementData>,
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        self.data.element_type
    }

    pub fn child_count(&self) -> usize {
        self.data.children.len()
    }

    /// Resolve child `i`, materializing it on first access.
    pub fn child(&self, i: usize) -> Result<Element> {
        let slot = self.data.children.get(i).ok_or_else(|| {
            Error::Corruption(format!(
                "child index {i} out of range ({} children)",
                self.data.children.len()
            ))
        })?;
        let data = match slot {
            ChildSlot::Node(idx) => self.doc.node_element(*idx)?,
            ChildSlot::Template(t) => self.doc.template_element(*t)?,
            ChildSlot::Direct(arc) => Arc::clone(arc),
        };
        Ok(Element {
            doc: Arc::clone(&self.doc),
            data,
        })
    }

    pub fn properties(&self) -> &[PropertyEntry] {
        &self.data.properties
    }

    /// First value for `property_id`, if set on this element.
    pub fn property(&self, property_id: u32) -> Option<&PropertyValue> {
        self.data
            .properties
            .iter()
            .find(|p| p.property_id == property_id)
            .map(|p| &p.value)
    }

    pub fn color(&self, property_id: u32) -> Option<Color> {
        match self.property(property_id) {
            Some(PropertyValue::Color(c)) => Some(*c),
            _ => None,
        }
    }

    pub fn text(&self, property_id: u32) -> Option<&str> {
        match self.property(property_id) {
            Some(PropertyValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Copy-on-write mutable access. The first call on a shared element
    /// clones the data; the detached copy is owned by this handle and is
    /// not written back to the document cache.
    pub fn make_mut(&mut self) -> &mut ElementData {
        Arc::make_mut(&mut self.data)
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("type", &self.data.element_type)
            .field("properties", &self.data.properties.len())
            .field("children", &self.data.children.len())
            .finish()
    }
}
