//! Intermediate representation: the element tree handed to the encoder.
//!
//! Nodes live in an arena addressed by `NodeId`; children are index lists.
//! This avoids ownership cycles and matches the append-only build model —
//! nodes are never mutated after their subtree is attached.
//!
//! Property values are a closed tagged-variant enum so serialization and
//! validation stay exhaustive. String-bearing variants hold raw text here;
//! the encoder interns them and rewrites to indices before serialization.

/// Arena index of an element node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Element type discriminant.
///
/// Wire tags 0..=5 are fixed; `Custom` carries its own tag byte in the
/// range 0x80..=0xFF. Tags outside both ranges are unknown to this runtime
/// and degrade to `Container` at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Root,
    Container,
    Text,
    Button,
    Input,
    Image,
    Custom(u8),
}

impl ElementType {
    /// Wire tag byte for this element type.
    pub fn tag(self) -> u8 {
        match self {
            ElementType::Root => 0,
            ElementType::Container => 1,
            ElementType::Text => 2,
            ElementType::Button => 3,
            ElementType::Input => 4,
            ElementType::Image => 5,
            ElementType::Custom(tag) => tag,
        }
    }

    /// Map a wire tag back to an element type. Returns `None` for tags this
    /// runtime does not recognize (decode degrades those to `Container`).
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ElementType::Root),
            1 => Some(ElementType::Container),
            2 => Some(ElementType::Text),
            3 => Some(ElementType::Button),
            4 => Some(ElementType::Input),
            5 => Some(ElementType::Image),
            0x80..=0xFF => Some(ElementType::Custom(tag)),
            _ => None,
        }
    }
}

/// RGBA color. Wire format: exactly 4 bytes, channel order R,G,B,A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn from_rgba_u32(v: u32) -> Self {
        Self {
            r: (v >> 24) as u8,
            g: (v >> 16) as u8,
            b: (v >> 8) as u8,
            a: v as u8,
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self {
            r: b[0],
            g: b[1],
            b: b[2],
            a: b[3],
        }
    }
}

/// Property value type tag on the wire. Also the canonical tie-break order
/// when two entries share a property id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Str = 0,
    Int = 1,
    Float = 2,
    Color = 3,
    Bool = 4,
    Enum = 5,
    StyleRef = 6,
    VarRef = 7,
}

impl TypeTag {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(TypeTag::Str),
            1 => Some(TypeTag::Int),
            2 => Some(TypeTag::Float),
            3 => Some(TypeTag::Color),
            4 => Some(TypeTag::Bool),
            5 => Some(TypeTag::Enum),
            6 => Some(TypeTag::StyleRef),
            7 => Some(TypeTag::VarRef),
            _ => None,
        }
    }
}

/// A property value in IR form. Text is raw here; the encoder interns it.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    Float(f32),
    Color(Color),
    Bool(bool),
    /// Index into an externally-defined enum variant table.
    Enum(u32),
    /// Reference to a shared style definition.
    StyleRef(u32),
    /// Reference to a scripting-layer variable binding.
    VarRef(u32),
}

impl PropertyValue {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            PropertyValue::Str(_) => TypeTag::Str,
            PropertyValue::Int(_) => TypeTag::Int,
            PropertyValue::Float(_) => TypeTag::Float,
            PropertyValue::Color(_) => TypeTag::Color,
            PropertyValue::Bool(_) => TypeTag::Bool,
            PropertyValue::Enum(_) => TypeTag::Enum,
            PropertyValue::StyleRef(_) => TypeTag::StyleRef,
            PropertyValue::VarRef(_) => TypeTag::VarRef,
        }
    }
}

/// One property assignment on an element.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    pub property_id: u32,
    pub value: PropertyValue,
}

impl PropertyEntry {
    pub fn new(property_id: u32, value: PropertyValue) -> Self {
        Self { property_id, value }
    }
}

/// An element node in the IR arena.
#[derive(Debug, Clone)]
pub struct ElementNode {
    pub element_type: ElementType,
    pub properties: Vec<PropertyEntry>,
    pub children: Vec<NodeId>,
}

/// The IR tree: an arena of nodes plus the root id.
///
/// Built by the front end, consumed by [`crate::encode::encode`]. Append-only:
/// `add_node` hands out sequential ids and attachment happens through the
/// parent's child list at creation time.
#[derive(Debug, Clone)]
pub struct IrTree {
    nodes: Vec<ElementNode>,
    root: NodeId,
}

impl IrTree {
    /// Create a tree with a root node of the given type and properties.
    pub fn new(root_type: ElementType, properties: Vec<PropertyEntry>) -> Self {
        Self {
            nodes: vec![ElementNode {
                element_type: root_type,
                properties,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    /// Add a node and attach it as the last child of `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        element_type: ElementType,
        properties: Vec<PropertyEntry>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(ElementNode {
            element_type,
            properties,
            children: Vec::new(),
        });
        self.nodes[parent.0 as usize].children.push(id);
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ElementNode {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
