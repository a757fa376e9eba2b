//! Binary UI-document format, codecs, and read-side runtime.
//!
//! This crate owns the `UIDB` on-disk format for compiled UI descriptions:
//! a deduplicating string table with suffix factoring, canonicalized shared
//! property blocks, a structurally-compressed element tree with a subtree
//! template table, and a checksummed envelope. The write side
//! ([`encode::encode`]) is deterministic; the read side
//! ([`decode::BinaryDocument`]) validates the envelope up front and
//! materializes elements lazily through a byte-bounded cache.

pub mod diagnostics;
pub mod error;
pub mod ir;
pub mod varint;
pub mod version;

pub mod decode;
pub mod encode;
pub mod format;
pub mod intern;
pub mod props;
pub mod template;

// ── Core types ───────────────────────────────────────────────────────────────
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{Error, Result};
pub use ir::{Color, ElementType, IrTree, NodeId, PropertyEntry, PropertyValue, TypeTag};

// ── Write side ───────────────────────────────────────────────────────────────
pub use encode::{encode, encode_to_path, EncodeOptions, EncodeOutput};
pub use format::Compression;
pub use intern::{StringIndex, StringInterner};
pub use props::{property_ids, BlockRef, DefaultTable, PropertyBlockBuilder};

// ── Read side ────────────────────────────────────────────────────────────────
pub use decode::{BinaryDocument, DecodeOptions, Element};
pub use intern::StringTable;

// ── Version negotiation ──────────────────────────────────────────────────────
pub use version::{
    capabilities, classify, Compatibility, Feature, FeatureCapabilitySet, FormatVersion,
    CURRENT_VERSION,
};
