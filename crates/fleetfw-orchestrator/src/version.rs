//! Firmware version parsing and comparison
//!
//! Vendor firmware versions are dotted numerics ("2.10.1", "4.40.00.00").
//! Comparing them as strings gets "2.9.0" > "2.10.0" wrong, so versions are
//! parsed into numeric components before any ordering decision.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use fleetfw_errors::VersionError;

/// A firmware version with numeric component comparison
///
/// # Examples
///
/// ```
/// use fleetfw_orchestrator::version::FirmwareVersion;
///
/// # fn main() -> Result<(), fleetfw_errors::VersionError> {
/// let old = FirmwareVersion::parse("2.9.0")?;
/// let new = FirmwareVersion::parse("2.10.0")?;
/// assert!(old < new);
/// assert_eq!(new.major(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FirmwareVersion {
    original: String,
    components: Vec<u64>,
}

impl FirmwareVersion {
    /// Parse a version string such as "1", "1.2" or "4.40.00.00".
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty or any component is not an
    /// unsigned integer.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut components = Vec::new();
        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(VersionError::InvalidComponent(
                    part.to_string(),
                    "empty component".to_string(),
                ));
            }
            let num = part
                .parse::<u64>()
                .map_err(|e| VersionError::InvalidComponent(part.to_string(), e.to_string()))?;
            components.push(num);
        }

        Ok(Self {
            original: trimmed.to_string(),
            components,
        })
    }

    /// Compare two version strings, `None` if either fails to parse.
    pub fn try_compare(a: &str, b: &str) -> Option<Ordering> {
        let va = Self::parse(a).ok()?;
        let vb = Self::parse(b).ok()?;
        Some(va.cmp(&vb))
    }

    /// Number of major versions `to` is ahead of `from`, if both parse.
    pub fn major_distance(from: &str, to: &str) -> Option<u64> {
        let from = Self::parse(from).ok()?;
        let to = Self::parse(to).ok()?;
        Some(to.major().saturating_sub(from.major()))
    }

    /// Leading component.
    pub fn major(&self) -> u64 {
        self.components.first().copied().unwrap_or(0)
    }

    /// Get the original version string
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Get the numeric components
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Normalized form with leading zeros and trailing zero components
    /// dropped, so equal versions share one lookup key.
    pub fn canonical(&self) -> String {
        let mut end = self.components.len();
        while end > 1 && self.components.get(end - 1) == Some(&0) {
            end -= 1;
        }
        self.components
            .iter()
            .take(end)
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Missing components compare as 0, so "1.2" == "1.2.0"
        let max_len = self.components.len().max(other.components.len());
        for i in 0..max_len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FirmwareVersion {}

impl FromStr for FirmwareVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
