//! Version/compatibility negotiation.
//!
//! The single place that compares format version numbers. Every other module
//! consumes a [`FeatureCapabilitySet`] computed here — no "if version >= X"
//! checks are allowed elsewhere.
//!
//! Capabilities are monotonic within a major version: anything available at
//! minor N is available at every minor > N. A major version bump is a
//! separate compatibility class and reports as [`Compatibility::Unsupported`].

/// A format version as declared in the file header (major.minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
}

impl FormatVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The newest format version this runtime writes and fully understands.
pub const CURRENT_VERSION: FormatVersion = FormatVersion::new(1, 2);

/// Named format features gated by version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Subtree template table and template references in the element tree.
    SubtreeTemplates,
    /// Whole-table compression of the string payload.
    CompressedStringTable,
    /// Factored string records (`base_index + suffix`).
    SuffixFactoring,
    /// Custom element tags in the 0x80..=0xFF range.
    CustomElements,
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::SubtreeTemplates => "subtree-templates",
            Feature::CompressedStringTable => "compressed-string-table",
            Feature::SuffixFactoring => "suffix-factoring",
            Feature::CustomElements => "custom-elements",
        }
    }
}

/// The set of capabilities a given format version makes available, plus the
/// property-id range that version defines. Consumed by the encoder (strict
/// vs. compat property policy) and the decoder (degradation policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCapabilitySet {
    version: FormatVersion,
    features: Vec<Feature>,
    /// Property ids below this bound are defined for the version.
    max_property_id: u32,
}

impl FeatureCapabilitySet {
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Whether `property_id` is defined for this format version.
    pub fn knows_property_id(&self, property_id: u32) -> bool {
        property_id < self.max_property_id
    }

    /// Whether the element wire tag is defined for this format version.
    /// Builtin tags 0..=5 exist from 1.0; the custom range is gated.
    pub fn knows_element_tag(&self, tag: u8) -> bool {
        match tag {
            0..=5 => true,
            0x80..=0xFF => self.supports(Feature::CustomElements),
            _ => false,
        }
    }
}

/// Compute the capability set for a declared format version.
///
/// Pure and monotonic: the feature list for minor N is a prefix of the list
/// for minor N+1. Versions newer than [`CURRENT_VERSION`] are clamped to the
/// newest capability set this runtime implements — the caller learns about
/// the gap through [`classify`].
pub fn capabilities(declared: FormatVersion) -> FeatureCapabilitySet {
    // (minimum minor, feature) pairs for major version 1, in introduction order.
    const GATES: &[(u8, Feature)] = &[
        (1, Feature::SubtreeTemplates),
        (1, Feature::CompressedStringTable),
        (2, Feature::SuffixFactoring),
        (2, Feature::CustomElements),
    ];

    let effective_minor = declared.minor.min(CURRENT_VERSION.minor);
    let features = GATES
        .iter()
        .filter(|(min_minor, _)| effective_minor >= *min_minor)
        .map(|&(_, f)| f)
        .collect();

    let max_property_id = match effective_minor {
        0 => 64,
        1 => 128,
        _ => 256,
    };

    FeatureCapabilitySet {
        version: declared,
        features,
        max_property_id,
    }
}

/// Outcome of comparing a file's declared version against a runtime maximum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    /// The runtime implements everything the file may use.
    FullySupported,
    /// The file may use features the runtime lacks; decode proceeds with
    /// degradation for the named features.
    SupportedWithDegradation(Vec<Feature>),
    /// Major version exceeds runtime capability; decode must not proceed.
    Unsupported,
}

/// Classify a file version against the runtime's maximum supported version.
pub fn classify(file: FormatVersion, runtime_max: FormatVersion) -> Compatibility {
    if file.major != runtime_max.major {
        return Compatibility::Unsupported;
    }
    if file.minor <= runtime_max.minor {
        return Compatibility::FullySupported;
    }
    // Newer minor: list the features introduced after the runtime's minor.
    // The declared feature set is monotonic, so this is the exact gap for
    // versions this runtime has gate entries for; unknown future features
    // surface per-item during decode as diagnostics.
    let runtime_caps = capabilities(runtime_max);
    let file_caps = capabilities(file);
    let missing = file_caps
        .features()
        .iter()
        .copied()
        .filter(|f| !runtime_caps.supports(*f))
        .collect();
    Compatibility::SupportedWithDegradation(missing)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_monotonic() {
        let v10 = capabilities(FormatVersion::new(1, 0));
        let v11 = capabilities(FormatVersion::new(1, 1));
        let v12 = capabilities(FormatVersion::new(1, 2));

        for f in v10.features() {
            assert!(v11.supports(*f));
            assert!(v12.supports(*f));
        }
        for f in v11.features() {
            assert!(v12.supports(*f));
        }
        assert!(!v10.supports(Feature::SubtreeTemplates));
        assert!(v11.supports(Feature::SubtreeTemplates));
        assert!(!v11.supports(Feature::SuffixFactoring));
        assert!(v12.supports(Feature::SuffixFactoring));
    }

    #[test]
    fn test_property_id_range_widens() {
        assert!(capabilities(FormatVersion::new(1, 0)).knows_property_id(63));
        assert!(!capabilities(FormatVersion::new(1, 0)).knows_property_id(64));
        assert!(capabilities(FormatVersion::new(1, 2)).knows_property_id(255));
        assert!(!capabilities(FormatVersion::new(1, 2)).knows_property_id(256));
    }

    #[test]
    fn test_element_tag_gating() {
        let v10 = capabilities(FormatVersion::new(1, 0));
        let v12 = capabilities(FormatVersion::new(1, 2));
        assert!(v10.knows_element_tag(5));
        assert!(!v10.knows_element_tag(0x90));
        assert!(v12.knows_element_tag(0x90));
        assert!(!v12.knows_element_tag(0x42));
    }

    #[test]
    fn test_classify_full_support() {
        assert_eq!(
            classify(FormatVersion::new(1, 0), CURRENT_VERSION),
            Compatibility::FullySupported
        );
        assert_eq!(
            classify(CURRENT_VERSION, CURRENT_VERSION),
            Compatibility::FullySupported
        );
    }

    #[test]
    fn test_classify_degraded() {
        let result = classify(FormatVersion::new(1, 2), FormatVersion::new(1, 1));
        match result {
            Compatibility::SupportedWithDegradation(missing) => {
                assert!(missing.contains(&Feature::SuffixFactoring));
                assert!(missing.contains(&Feature::CustomElements));
                assert!(!missing.contains(&Feature::SubtreeTemplates));
            }
            other => panic!("expected degradation, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_unsupported_major() {
        assert_eq!(
            classify(FormatVersion::new(2, 0), CURRENT_VERSION),
            Compatibility::Unsupported
        );
    }
}
