//! UTM version parsing and driver variant selection.
//!
//! ## Variants
//!
//! Each variant is a [`Capabilities`] table. 4.6 is the 4.5 table with the
//! export, import and guest tools entries overridden; callers see one
//! [`Driver`](super::Driver) interface regardless of which table is active.
//!
//! ```text
//! 4.5.x ──→ UTM_4_5  (manual export, open-bundle import, no guest tools)
//! 4.6.x ─┬→ UTM_4_6  (scripted export, import by id, downloaded guest tools)
//! 4.7.x ─┘
//! other ──→ UnsupportedVersion
//! ```

use std::fmt;
use std::str::FromStr;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// A `major.minor.patch` UTM release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UtmVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl UtmVersion {
    pub fn major_minor(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

impl FromStr for UtmVersion {
    type Err = BuildError;

    /// Accepts exactly three numeric segments, surrounding whitespace allowed.
    fn from_str(raw: &str) -> BuildResult<Self> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(BuildError::InvalidVersion(raw.to_string()));
        };
        let num = |s: &str| -> BuildResult<u32> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(BuildError::InvalidVersion(raw.to_string()));
            }
            s.parse()
                .map_err(|_| BuildError::InvalidVersion(raw.to_string()))
        };
        Ok(Self {
            major: num(major)?,
            minor: num(minor)?,
            patch: num(patch)?,
        })
    }
}

impl fmt::Display for UtmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How a variant exports a VM bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSupport {
    /// No scripting support; the operator exports from the UTM menu.
    Manual,
    /// `export virtual machine id ... to POSIX file ...`.
    Scripted,
}

/// How a variant imports a `.utm` bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMethod {
    /// `open POSIX file` registers a shortcut; the id is looked up afterwards.
    OpenBundle,
    /// `import new virtual machine from POSIX file` returns the new id.
    ImportNew,
}

/// Where a variant finds the guest tools ISO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestToolsSource {
    Unavailable,
    /// UTM's own download location inside its sandbox container.
    AppSupport,
}

/// Behaviour table for one driver variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub export: ExportSupport,
    pub import: ImportMethod,
    pub guest_tools: GuestToolsSource,
}

pub const UTM_4_5: Capabilities = Capabilities {
    export: ExportSupport::Manual,
    import: ImportMethod::OpenBundle,
    guest_tools: GuestToolsSource::Unavailable,
};

pub const UTM_4_6: Capabilities = Capabilities {
    export: ExportSupport::Scripted,
    import: ImportMethod::ImportNew,
    guest_tools: GuestToolsSource::AppSupport,
    ..UTM_4_5
};

/// Selected driver variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Lowest supported variant; also used to query the version.
    Utm45,
    Utm46,
}

/// Known `major.minor` releases and the variant that speaks their dialect.
const SUPPORTED_RELEASES: &[((u32, u32), DriverKind)] = &[
    ((4, 5), DriverKind::Utm45),
    ((4, 6), DriverKind::Utm46),
    ((4, 7), DriverKind::Utm46),
];

impl DriverKind {
    /// Variant for a detected version. Unknown releases are fatal.
    pub fn for_version(version: &UtmVersion) -> BuildResult<Self> {
        SUPPORTED_RELEASES
            .iter()
            .find(|(mm, _)| *mm == version.major_minor())
            .map(|(_, kind)| *kind)
            .ok_or_else(|| BuildError::UnsupportedVersion(version.to_string()))
    }

    /// Variant for a raw version string.
    pub fn for_version_str(raw: &str) -> BuildResult<Self> {
        Self::for_version(&raw.parse()?)
    }

    pub fn capabilities(self) -> &'static Capabilities {
        match self {
            DriverKind::Utm45 => &UTM_4_5,
            DriverKind::Utm46 => &UTM_4_6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DriverKind::Utm45 => "utm-4.5",
            DriverKind::Utm46 => "utm-4.6",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_selection() {
        assert_eq!(DriverKind::for_version_str("4.5.0").unwrap(), DriverKind::Utm45);
        assert_eq!(DriverKind::for_version_str("4.6.1").unwrap(), DriverKind::Utm46);
        assert_eq!(DriverKind::for_version_str("4.7.9").unwrap(), DriverKind::Utm46);
        assert!(matches!(
            DriverKind::for_version_str("9.9.9"),
            Err(BuildError::UnsupportedVersion(v)) if v == "9.9.9"
        ));
    }

    #[test]
    fn test_malformed_versions_are_rejected() {
        for raw in ["4.7", "4", "", "something", "4.7.1.1", "4.7.x", "4..1", "-4.7.1"] {
            assert!(
                matches!(raw.parse::<UtmVersion>(), Err(BuildError::InvalidVersion(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let v: UtmVersion = " 4.7.2\n".parse().unwrap();
        assert_eq!(v.major_minor(), (4, 7));
        assert_eq!(v.to_string(), "4.7.2");
    }

    #[test]
    fn test_major_minor_key() {
        let cases = [
            ("4.7.1", (4, 7)),
            ("4.7.11", (4, 7)),
            ("10.11.22", (10, 11)),
            (" 4.7.2", (4, 7)),
            ("4.7.2 ", (4, 7)),
        ];
        for (input, expected) in cases {
            let v: UtmVersion = input.parse().unwrap();
            assert_eq!(v.major_minor(), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_4_6_overrides_only_what_differs() {
        assert_eq!(UTM_4_5.export, ExportSupport::Manual);
        assert_eq!(UTM_4_6.export, ExportSupport::Scripted);
        assert_eq!(UTM_4_6.import, ImportMethod::ImportNew);
        assert_eq!(DriverKind::Utm46.capabilities().guest_tools, GuestToolsSource::AppSupport);
    }
}
