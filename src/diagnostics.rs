//! Non-fatal degradation reports collected during decode.
//!
//! Compatibility degradations (unknown element tags, skipped properties,
//! lenient-mode corruption) are policy-governed substitutions, not errors.
//! They succeed the load but surface here so callers can inspect what was
//! lost.

use std::fmt;

/// A single degradation event recorded during decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// An element tag unknown to this runtime was replaced by a generic
    /// container.
    UnknownElementTag { tag: u8, node_index: u32 },
    /// A property id unknown to this runtime was skipped.
    UnknownPropertyId { property_id: u32, node_index: u32 },
    /// A property id unknown to the target format version was dropped at
    /// encode time (compatibility mode).
    DroppedProperty { property_id: u32 },
    /// Checksum mismatch tolerated in lenient mode.
    ChecksumIgnored { expected: u32, actual: u32 },
    /// The file declares features this runtime does not implement; named
    /// feature was degraded.
    MissingFeature { feature: &'static str },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownElementTag { tag, node_index } => write!(
                f,
                "unknown element tag {tag:#04x} at node {node_index}; degraded to container"
            ),
            Self::UnknownPropertyId {
                property_id,
                node_index,
            } => write!(
                f,
                "unknown property id {property_id} at node {node_index}; skipped"
            ),
            Self::DroppedProperty { property_id } => {
                write!(f, "property id {property_id} dropped for target version")
            }
            Self::ChecksumIgnored { expected, actual } => write!(
                f,
                "checksum mismatch ignored in lenient mode (expected {expected:#010x}, got {actual:#010x})"
            ),
            Self::MissingFeature { feature } => {
                write!(f, "feature {feature} unavailable in this runtime; degraded")
            }
        }
    }
}

/// Ordered collection of degradation events for one encode or decode pass.
#[derive(Debug, Default)]
pub struct Diagnostics {
    events: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, also emitting it at `warn` level.
    pub fn push(&mut self, event: Diagnostic) {
        tracing::warn!("{event}");
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.events.iter()
    }

    /// Drain all events (for merging a sub-pass into a parent collector).
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.events)
    }
}
