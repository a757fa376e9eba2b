//! Tree compressor: detects structurally identical subtrees and replaces
//! repeats with references into a shared template table.
//!
//! Works bottom-up on structural hashes: the hash of a node covers its type
//! tag, its property block ref, and the ordered hashes of its children.
//! Hash equality alone never merges two subtrees — an exact comparison of
//! the canonical subtree bytes disambiguates collisions first.
//!
//! Templates are assigned indices in first-materialization order during the
//! rewrite pass. A template body is built before its index is assigned, so
//! nested template references always point at strictly lower indices and the
//! table is acyclic by construction.

use crate::ir::{IrTree, NodeId};
use crate::props::BlockRef;
use crate::varint::encode_varint;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

/// Seed mixed into every leaf hash so empty subtrees do not hash to zero.
const LEAF_SEED: u64 = 0x5ED5_EED5_EED5_EED5;

/// Compressor tuning derived from the optimization level.
#[derive(Debug, Clone, Copy)]
pub struct CompressorConfig {
    /// Level 0 disables templating entirely.
    pub enabled: bool,
    /// Minimum net byte savings before a repeated subtree becomes a template.
    pub min_benefit: usize,
}

impl CompressorConfig {
    /// Map an optimization level (0..=3) onto compressor settings.
    pub fn for_level(level: u8) -> Self {
        match level {
            0 => Self {
                enabled: false,
                min_benefit: usize::MAX,
            },
            1 => Self {
                enabled: true,
                min_benefit: 8,
            },
            2 => Self {
                enabled: true,
                min_benefit: 4,
            },
            _ => Self {
                enabled: true,
                min_benefit: 0,
            },
        }
    }
}

/// A child position in the compressed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    Inline(TreeNode),
    Template(u32),
}

/// A node in the compressed output tree (and in template bodies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub tag: u8,
    pub block: BlockRef,
    pub children: Vec<ChildRef>,
}

/// The shared template table: each entry is a canonical subtree stored once.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TemplateTable {
    pub templates: Vec<TreeNode>,
}

impl TemplateTable {
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Approximate encoded cost of a template reference (kind byte + varint).
const TEMPLATE_REF_COST: usize = 2;

/// Compress a resolved tree, returning the template table and the rewritten
/// root. `blocks[node.0]` is the property block ref assigned to each node.
pub fn compress(
    tree: &IrTree,
    blocks: &[BlockRef],
    config: &CompressorConfig,
) -> (TemplateTable, TreeNode) {
    let mut cx = Compressor {
        tree,
        blocks,
        canon: vec![Vec::new(); tree.len()],
        selected: FxHashMap::default(),
        assigned: FxHashMap::default(),
        templates: Vec::new(),
    };

    if config.enabled {
        cx.hash_pass(tree.root());
        cx.select(config.min_benefit);
    }

    let root = cx.build_inline(tree.root());
    (
        TemplateTable {
            templates: cx.templates,
        },
        root,
    )
}

/// Distinct-structure bookkeeping from the hash pass.
struct Occurrence {
    /// Canonical bytes of the structure (exact-equality key).
    canon: Vec<u8>,
    count: u32,
}

struct Compressor<'a> {
    tree: &'a IrTree,
    blocks: &'a [BlockRef],
    /// Canonical subtree bytes per node, filled bottom-up.
    canon: Vec<Vec<u8>>,
    /// Canonical bytes of structures that passed the net-savings gate.
    selected: FxHashMap<Vec<u8>, ()>,
    /// Canonical bytes -> assigned template index.
    assigned: FxHashMap<Vec<u8>, u32>,
    templates: Vec<TreeNode>,
}

impl Compressor<'_> {
    /// Bottom-up canonical bytes for every subtree. The canonical encoding
    /// is injective over (tag, block ref, ordered children), so byte
    /// equality is structural equality; xxh3 over these bytes is the
    /// structural hash used for bucketing.
    fn hash_pass(&mut self, node: NodeId) {
        let n = self.tree.node(node);
        let mut canon = Vec::with_capacity(8 + 16 * n.children.len());
        canon.extend_from_slice(&LEAF_SEED.to_le_bytes());
        canon.push(n.element_type.tag());
        encode_varint(self.blocks[node.0 as usize].0, &mut canon);
        encode_varint(n.children.len() as u32, &mut canon);
        for &child in &n.children {
            self.hash_pass(child);
            canon.extend_from_slice(&self.canon[child.0 as usize]);
        }
        self.canon[node.0 as usize] = canon;
    }

    /// Count occurrences of each distinct structure and keep the ones whose
    /// net savings clear `min_benefit`.
    ///
    /// Counts are taken before any collapsing, so occurrences nested inside
    /// another selected structure still count; the gate is a pre-collapse
    /// estimate, not an exact accounting.
    fn select(&mut self, min_benefit: usize) {
        let mut by_hash: FxHashMap<u64, Vec<Occurrence>> = FxHashMap::default();
        for canon in &self.canon {
            let hash = xxh3_64(canon);
            let bucket = by_hash.entry(hash).or_default();
            match bucket.iter_mut().find(|o| o.canon == *canon) {
                Some(occ) => occ.count += 1,
                None => bucket.push(Occurrence {
                    canon: canon.clone(),
                    count: 1,
                }),
            }
        }

        // Never template the root structure: it has exactly one top-level
        // occurrence and the table copy would be pure overhead there.
        let root_canon = self.canon[self.tree.root().0 as usize].clone();

        for bucket in by_hash.into_values() {
            for occ in bucket {
                if occ.count < 2 || occ.canon == root_canon {
                    continue;
                }
                let count = occ.count as usize;
                // Structure bytes exclude the 8-byte leaf seed prefix.
                let body_cost = occ.canon.len() - 8;
                let inline_total = count * body_cost;
                let templated = body_cost + count * TEMPLATE_REF_COST;
                if inline_total > templated && inline_total - templated >= min_benefit {
                    self.selected.insert(occ.canon, ());
                }
            }
        }
    }

    /// Rewrite the subtree at `node`, substituting template references for
    /// selected structures.
    fn rewrite(&mut self, node: NodeId) -> ChildRef {
        let canon = &self.canon[node.0 as usize];
        if self.selected.contains_key(canon) {
            let key = canon.clone();
            let idx = self.materialize_template(key, node);
            return ChildRef::Template(idx);
        }
        ChildRef::Inline(self.build_inline(node))
    }

    /// Build a node inline, rewriting its children.
    fn build_inline(&mut self, node: NodeId) -> TreeNode {
        let n = self.tree.node(node);
        let children = n.children.iter().map(|&c| self.rewrite(c)).collect();
        TreeNode {
            tag: n.element_type.tag(),
            block: self.blocks[node.0 as usize],
            children,
        }
    }

    /// Get or create the template index for a selected structure. The body
    /// is built before the index is assigned, so nested references point at
    /// strictly lower indices.
    fn materialize_template(&mut self, key: Vec<u8>, node: NodeId) -> u32 {
        if let Some(&idx) = self.assigned.get(&key) {
            return idx;
        }
        let body = self.build_inline(node);
        let idx = self.templates.len() as u32;
        self.templates.push(body);
        self.assigned.insert(key, idx);
        idx
    }
}

// =============================================================================
// Tests
// =============================================================================
