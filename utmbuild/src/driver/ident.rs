//! Identifier extraction from control-command output.
//!
//! UTM reports identifiers in two shapes depending on the operation and
//! version: a bare 36-character hyphenated hex token (`create_vm`,
//! `attach_iso`) or an AppleScript object specifier such as
//! `virtual machine id 5E2A...` (`create_vm_from_source`, import on 4.6+).
//! Both shapes are tried, in that fixed order, for every operation.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use utmbuild_shared::errors::{BuildError, BuildResult};

static UUID_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F-]{36}").expect("static regex")
});

static LABELED_VM_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"virtual machine id ([A-Fa-f0-9-]+)").expect("static regex")
});

/// Opaque identifier of a UTM virtual machine.
///
/// Assigned once by the create/import step; every later step and cleanup
/// reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmId(String);

impl VmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VmId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Find the first identifier in `output`, trying the bare UUID shape first and
/// the labelled shape second.
///
/// Bare tokens that also parse as a UUID are preferred over other 36-character
/// runs of hex and dashes.
pub fn find_identifier(output: &str) -> Option<String> {
    let mut fallback = None;
    for m in UUID_TOKEN.find_iter(output) {
        if uuid::Uuid::parse_str(m.as_str()).is_ok() {
            return Some(m.as_str().to_string());
        }
        fallback.get_or_insert_with(|| m.as_str().to_string());
    }
    if fallback.is_some() {
        return fallback;
    }

    LABELED_VM_ID
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Like [`find_identifier`] but a missing identifier is an error naming `what`.
pub fn require_identifier(output: &str, what: &str) -> BuildResult<String> {
    find_identifier(output).ok_or_else(|| BuildError::OutputMismatch {
        what: what.to_string(),
        output: output.to_string(),
    })
}
