//! Build configuration.
//!
//! A build is described by one JSON document. Every field has a default, so
//! the smallest useful document only names the build kind and its input:
//!
//! ```json
//! { "kind": "iso", "iso_path": "/isos/debian-12-arm64.iso" }
//! ```
//!
//! `BuildConfig::sanitize` fills the defaults that depend on other fields
//! (VM name, ISO interface) and collects every validation problem into one
//! error.

use crate::driver::lookup;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Checksum of the `latest` guest tools ISO published by getutm.app.
pub const DEFAULT_GUEST_ADDITIONS_SHA256: &str =
    "65b6a69b392ee01dd314c10f3dad9ebbf9c4160be43f5f0dd6bb715944d9095b";

/// Upstream download location used when nothing better is known.
pub const DEFAULT_GUEST_ADDITIONS_URL: &str =
    "https://getutm.app/downloads/utm-guest-tools-latest.iso";

const HARD_DRIVE_INTERFACES: &[&str] = &["none", "ide", "scsi", "virtio", "nvme", "usb"];
const ISO_INTERFACES: &[&str] = &["ide", "sd", "floppy", "virtio", "nvme", "usb"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    /// Install from a boot ISO onto fresh drives.
    #[default]
    Iso,
    /// Boot a prepared cloud image with a cloud-init seed.
    Cloud,
    /// Start from an existing `.utm` bundle.
    Import,
}

impl BuildKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildKind::Iso => "iso",
            BuildKind::Cloud => "cloud",
            BuildKind::Import => "import",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestAdditionsMode {
    /// Provisioners upload the ISO; nothing is attached.
    #[default]
    Upload,
    /// Attach the ISO as a removable drive.
    Attach,
    Disable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestAdditionsConfig {
    /// `upload`, `attach` or `disable`. Empty means `upload`.
    pub mode: String,
    /// Controller the ISO is attached to; empty means the ISO interface.
    pub interface: String,
    /// Guest path the ISO is uploaded to.
    pub path: String,
    /// Download URL; `{{ .Version }}` is replaced by the additions version.
    pub url: String,
    pub sha256: String,
}

impl GuestAdditionsConfig {
    /// Apply defaults and return the problems found.
    pub fn prepare(&mut self, communicator: &str) -> Vec<String> {
        let mut errs = Vec::new();

        if self.mode.is_empty() {
            self.mode = "upload".into();
        }
        if self.path.is_empty() {
            self.path = "utm-guest-tools.iso".into();
        }

        match self.parsed_mode() {
            Some(GuestAdditionsMode::Upload) if communicator == "none" => {
                errs.push(
                    "guest_additions_mode 'upload' requires a communicator; \
                     communicator must not be 'none'"
                        .to_string(),
                );
            }
            Some(_) => {}
            None => errs.push(format!(
                "guest_additions_mode is invalid. Must be one of: upload, attach, disable (got {:?})",
                self.mode
            )),
        }

        self.sha256 = self.sha256.to_lowercase();
        errs
    }

    /// Mode after `prepare`; unknown strings give `None`.
    pub fn parsed_mode(&self) -> Option<GuestAdditionsMode> {
        match self.mode.as_str() {
            "" | "upload" => Some(GuestAdditionsMode::Upload),
            "attach" => Some(GuestAdditionsMode::Attach),
            "disable" => Some(GuestAdditionsMode::Disable),
            _ => None,
        }
    }

    pub fn mode(&self) -> GuestAdditionsMode {
        self.parsed_mode().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VncConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port_min: u16,
    pub port_max: u16,
    pub use_password: bool,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".into(),
            port_min: 5900,
            port_max: 6000,
            use_password: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// `ssh`, `winrm` or `none`.
    pub communicator: String,
    pub host_port_min: u16,
    pub host_port_max: u16,
    pub guest_port: u16,
    /// Keep the port forward in the exported VM.
    pub skip_nat_mapping: bool,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            communicator: "ssh".into(),
            host_port_min: 2222,
            host_port_max: 4444,
            guest_port: 22,
            skip_nat_mapping: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub skip_export: bool,
    pub format: String,
    /// Defaults to `output-<vm_name>`.
    pub output_directory: Option<PathBuf>,
    /// Defaults to the VM name.
    pub output_filename: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            skip_export: false,
            format: "utm".into(),
            output_directory: None,
            output_filename: None,
        }
    }
}

impl ExportConfig {
    /// Directory the bundle is written to, `output-<vm_name>` unless set.
    pub fn output_directory(&self, vm_name: &str) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("output-{}", vm_name)))
    }

    /// Bundle file name without the format extension.
    pub fn output_filename(&self, vm_name: &str) -> String {
        self.output_filename
            .clone()
            .unwrap_or_else(|| vm_name.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub kind: BuildKind,
    /// Used in the default VM name.
    pub build_name: String,

    pub vm_name: String,
    pub vm_arch: String,
    /// `qemu` or `apple`.
    pub vm_backend: String,
    pub cpus: u32,
    pub memory_mib: u32,
    pub uefi_boot: bool,
    pub hypervisor: bool,

    pub disk_size_mib: u64,
    pub disk_additional_size_mib: Vec<u64>,
    pub hard_drive_interface: String,
    pub iso_interface: String,

    /// Boot ISO (iso builds) or cloud image (cloud builds).
    pub iso_path: Option<PathBuf>,
    /// `.utm` bundle for import builds.
    pub source_path: Option<PathBuf>,
    /// Copy the cloud image and grow it to `disk_size_mib` instead of
    /// importing it as-is.
    pub resize_cloud_image: bool,

    /// Attach the cloud-init seed as a drive instead of serving it over HTTP.
    pub use_cd: bool,
    pub cd_path: Option<PathBuf>,
    pub http_host: String,
    pub http_port: Option<u16>,

    pub display_hardware_type: Option<String>,
    pub vnc: VncConfig,
    pub comm: CommConfig,
    pub guest_additions: GuestAdditionsConfig,
    pub export: ExportConfig,

    /// Keep the boot ISO attached in the exported bundle.
    pub bundle_iso: bool,
    pub keep_registered: bool,

    pub boot_wait_secs: u64,
    /// On stop failure, ask the operator to stop the VM instead of failing.
    pub manual_stop_fallback: bool,
    /// Deadline for each external command; none when unset.
    pub command_timeout_secs: Option<u64>,
    /// Where downloads are cached. Defaults to the user cache directory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            kind: BuildKind::Iso,
            build_name: "utm".into(),
            vm_name: String::new(),
            vm_arch: "aarch64".into(),
            vm_backend: "qemu".into(),
            cpus: 1,
            memory_mib: 512,
            uefi_boot: false,
            hypervisor: false,
            disk_size_mib: 40960,
            disk_additional_size_mib: Vec::new(),
            hard_drive_interface: "virtio".into(),
            iso_interface: String::new(),
            iso_path: None,
            source_path: None,
            resize_cloud_image: false,
            use_cd: false,
            cd_path: None,
            http_host: "192.168.75.1".into(),
            http_port: None,
            display_hardware_type: None,
            vnc: VncConfig::default(),
            comm: CommConfig::default(),
            guest_additions: GuestAdditionsConfig::default(),
            export: ExportConfig::default(),
            bundle_iso: false,
            keep_registered: false,
            boot_wait_secs: 10,
            manual_stop_fallback: false,
            command_timeout_secs: None,
            cache_dir: None,
        }
    }
}

impl BuildConfig {
    pub fn from_file(path: &Path) -> BuildResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> BuildResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| BuildError::Config(format!("invalid build configuration: {}", e)))
    }

    /// Fill dependent defaults and validate.
    ///
    /// Returns warnings on success; all errors are joined into one
    /// `BuildError::Config`.
    pub fn sanitize(&mut self) -> BuildResult<Vec<String>> {
        let mut errs = Vec::new();
        let mut warnings = Vec::new();

        if self.vm_name.is_empty() {
            self.vm_name = format!("packer-{}-{}", self.build_name, chrono::Utc::now().timestamp());
        }
        if self.vm_arch.is_empty() {
            self.vm_arch = "aarch64".into();
        }
        if self.vm_backend.is_empty() {
            self.vm_backend = "qemu".into();
        }
        if lookup::backend_code(&self.vm_backend).is_err() {
            errs.push(format!(
                "vm_backend must be 'qemu' or 'apple' (got {:?})",
                self.vm_backend
            ));
        }

        if self.hard_drive_interface.is_empty() {
            self.hard_drive_interface = "virtio".into();
        }
        if self.iso_interface.is_empty() {
            self.iso_interface = match self.kind {
                BuildKind::Cloud => "virtio".into(),
                _ => "usb".into(),
            };
        }
        if self.guest_additions.interface.is_empty() {
            self.guest_additions.interface = self.iso_interface.clone();
        }
        if !HARD_DRIVE_INTERFACES.contains(&self.hard_drive_interface.as_str()) {
            errs.push(format!(
                "hard_drive_interface can only be {}",
                HARD_DRIVE_INTERFACES.join(", ")
            ));
        }
        if !ISO_INTERFACES.contains(&self.iso_interface.as_str()) {
            errs.push(format!("iso_interface can only be {}", ISO_INTERFACES.join(", ")));
        }
        if !ISO_INTERFACES.contains(&self.guest_additions.interface.as_str()) {
            errs.push(format!(
                "guest_additions_interface can only be {}",
                ISO_INTERFACES.join(", ")
            ));
        }

        if self.cpus == 0 {
            errs.push("cpus must be at least 1".into());
        }
        if self.memory_mib == 0 {
            errs.push("memory_mib must be at least 1".into());
        }
        if self.disk_size_mib == 0 {
            self.disk_size_mib = 40960;
        }

        match self.kind {
            BuildKind::Iso if self.iso_path.is_none() => {
                errs.push("iso_path is required for iso builds".into());
            }
            BuildKind::Cloud => {
                if self.iso_path.is_none() {
                    errs.push("iso_path (cloud image) is required for cloud builds".into());
                }
                if self.use_cd {
                    if self.cd_path.is_none() {
                        errs.push("use_cd is true, but cd_path is not set".into());
                    }
                } else if self.http_port.is_none() {
                    errs.push("use_cd is false, but http_port is not set".into());
                }
            }
            BuildKind::Import if self.source_path.is_none() => {
                errs.push("source_path is required for import builds".into());
            }
            _ => {}
        }

        if self.vnc.port_min > self.vnc.port_max {
            errs.push("vnc port_min must be less than or equal to port_max".into());
        }
        if self.vnc.enabled && self.vnc.port_min < 5900 {
            errs.push("vnc port_min must be at least 5900".into());
        }
        if self.comm.host_port_min > self.comm.host_port_max {
            errs.push("comm host_port_min must be less than or equal to host_port_max".into());
        }

        errs.extend(self.guest_additions.prepare(&self.comm.communicator));

        if self.export.format.is_empty() {
            self.export.format = "utm".into();
        }
        if self.export.output_directory.is_none() {
            self.export.output_directory = Some(PathBuf::from(format!("output-{}", self.vm_name)));
        }
        if self.bundle_iso && self.kind != BuildKind::Iso {
            warnings.push("bundle_iso only applies to iso builds".to_string());
        }

        if !errs.is_empty() {
            return Err(BuildError::Config(errs.join("; ")));
        }
        Ok(warnings)
    }
}
