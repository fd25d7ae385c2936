//! Firmware catalog and version parsing errors.

/// Error type for firmware version parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Version string is empty
    #[error("empty version string")]
    Empty,

    /// Version component is not a valid number
    #[error("invalid version component '{0}': {1}")]
    InvalidComponent(String, String),
}

/// Catalog configuration errors.
///
/// These are raised when a catalog is loaded, never while walking it, so a
/// malformed catalog is rejected before any host is analyzed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Declared upgrade chains form a cycle
    #[error("Upgrade graph for {model}/{component} contains a cycle through version {version}")]
    Cycle {
        /// Server model
        model: String,
        /// Component type
        component: String,
        /// A version on the cycle
        version: String,
    },

    /// A declared upgrade chain is empty or has a single version
    #[error("Upgrade chain for {model}/{component} must list at least two versions")]
    EmptyChain {
        /// Server model
        model: String,
        /// Component type
        component: String,
    },

    /// The same model/component pair is declared twice
    #[error("Duplicate catalog entry for {model}/{component}")]
    DuplicateEntry {
        /// Server model
        model: String,
        /// Component type
        component: String,
    },

    /// A version string in the catalog does not parse
    #[error("Invalid version '{version}' in catalog entry {model}/{component}: {source}")]
    InvalidVersion {
        /// Server model
        model: String,
        /// Component type
        component: String,
        /// Offending version string
        version: String,
        /// Parse failure
        #[source]
        source: VersionError,
    },
}
