//! Read-only lookup tables for UTM enumeration codes and guest tool versions.

use utmbuild_shared::errors::{BuildError, BuildResult};

/// Drive controller name to UTM AppleScript enumeration code.
const CONTROLLER_CODES: &[(&str, &str)] = &[
    ("none", "QdIn"),
    ("ide", "QdIi"),
    ("scsi", "QdIs"),
    ("sd", "QdId"),
    ("mtd", "QdIm"),
    ("floppy", "QdIf"),
    ("pflash", "QdIp"),
    ("virtio", "QdIv"),
    ("nvme", "QdIn"),
    ("usb", "QdIu"),
];

/// Backend name to UTM AppleScript enumeration code.
const BACKEND_CODES: &[(&str, &str)] = &[("qemu", "QeMu"), ("apple", "ApLe")];

/// UTM release to guest tools release, for builds whose download URL is
/// versioned by the tools rather than by UTM.
const ADDITIONS_VERSIONS: &[(&str, &str)] = &[("4.6.4", "0.229.2"), ("4.7.4", "0.1.271")];

/// Enumeration code for a drive controller name.
pub fn controller_code(name: &str) -> BuildResult<&'static str> {
    CONTROLLER_CODES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
        .ok_or_else(|| BuildError::Config(format!("invalid controller name: {}", name)))
}

/// Enumeration code for a backend name.
pub fn backend_code(name: &str) -> BuildResult<&'static str> {
    BACKEND_CODES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
        .ok_or_else(|| BuildError::Config(format!("invalid vm_backend: {}", name)))
}

/// Guest tools version matching a UTM version, if the two differ.
pub fn additions_version(utm_version: &str) -> Option<&'static str> {
    ADDITIONS_VERSIONS
        .iter()
        .find(|(v, _)| *v == utm_version)
        .map(|(_, additions)| *additions)
}
