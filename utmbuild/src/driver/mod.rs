//! Versioned driver over the UTM control surface.
//!
//! ## Architecture
//!
//! ```text
//! Driver::detect()
//!   ├─ which("utmctl")
//!   ├─ base variant → version()          (osascript, System Events)
//!   ├─ DriverKind::for_version()         (4.5 | 4.6 | fatal)
//!   └─ verify()
//! ```
//!
//! All operations go through a [`CommandRunner`]; the driver itself only holds
//! the binary paths and the selected [`DriverKind`]. Operations whose dialect
//! differs between releases consult the variant's [`Capabilities`] table.

mod ident;
pub mod lookup;
mod scripts;
mod version;

pub use ident::{VmId, find_identifier, require_identifier};
pub use scripts::{ControlScript, ScriptCommand};
pub use version::{
    Capabilities, DriverKind, ExportSupport, GuestToolsSource, ImportMethod, UtmVersion,
};

use crate::executor::{CommandRunner, Invocation, execute};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use utmbuild_shared::errors::{BuildError, BuildResult};

const UTMCTL: &str = "utmctl";
const OSASCRIPT: &str = "osascript";

/// Location UTM 4.6+ downloads its guest tools to, relative to `$HOME`.
const GUEST_TOOLS_RELATIVE: &str = "Library/Containers/com.utmapp.UTM/Data/Library/Application Support/GuestSupportTools/utm-guest-tools-latest.iso";

/// Properties of a VM to create.
#[derive(Debug, Clone)]
pub struct NewVm<'a> {
    pub name: &'a str,
    /// UTM backend enum code (`QeMu`, `ApLe`).
    pub backend: &'a str,
    pub arch: &'a str,
    /// Disk image the first drive is imported from.
    pub source: Option<&'a Path>,
}

/// Result of an export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Exported,
    /// The installed UTM cannot export by script; the operator must do it.
    ManualActionRequired,
}

pub struct Driver {
    kind: DriverKind,
    utmctl: PathBuf,
    osascript: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl Driver {
    pub fn new(kind: DriverKind, utmctl: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            kind,
            utmctl: utmctl.into(),
            osascript: PathBuf::from(OSASCRIPT),
            runner,
        }
    }

    /// Locate `utmctl` on `PATH` and select the variant for the installed UTM.
    pub async fn detect(runner: Arc<dyn CommandRunner>) -> BuildResult<Self> {
        let utmctl = which::which(UTMCTL)
            .map_err(|e| BuildError::Environment(format!("{} not found: {}", UTMCTL, e)))?;
        tracing::info!(path = %utmctl.display(), "Found utmctl");
        Self::for_utmctl(utmctl, runner).await
    }

    /// Select the variant for the installed UTM using a known `utmctl` path.
    pub async fn for_utmctl(utmctl: PathBuf, runner: Arc<dyn CommandRunner>) -> BuildResult<Self> {
        let base = Self::new(DriverKind::Utm45, utmctl, runner);
        let version = base.version().await?;
        let kind = DriverKind::for_version(&version)?;
        tracing::info!(version = %version, driver = %kind, "Detected UTM");

        let driver = Self { kind, ..base };
        driver.verify()?;
        Ok(driver)
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn capabilities(&self) -> &'static Capabilities {
        self.kind.capabilities()
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Check the driver can function at all.
    pub fn verify(&self) -> BuildResult<()> {
        if !self.utmctl.is_file() {
            return Err(BuildError::Environment(format!(
                "utmctl is not a file: {}",
                self.utmctl.display()
            )));
        }
        Ok(())
    }

    /// Installed UTM version, as reported by System Events.
    pub async fn version(&self) -> BuildResult<UtmVersion> {
        let output = self
            .osascript_inline(
                "utm_version",
                r#"tell application "System Events" to return version of application "UTM""#,
            )
            .await;

        let output = match output {
            Ok(out) => out,
            Err(BuildError::Control { message, .. }) if message.contains("get application") => {
                return Err(BuildError::Environment("UTM is not installed".into()));
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(output = %output, "UTM version output");

        if output.contains("get application") {
            return Err(BuildError::Environment("UTM is not installed".into()));
        }
        output.parse()
    }

    /// Run `utmctl <args...>`.
    pub async fn utmctl(&self, args: &[&str]) -> BuildResult<String> {
        if args.is_empty() {
            return Err(BuildError::InvalidArgument("no utmctl command provided".into()));
        }
        let invocation = Invocation::new(&self.utmctl, args.iter().copied());
        execute(self.runner.as_ref(), &invocation).await
    }

    /// Run a bundled control script with its arguments.
    ///
    /// The script body is fed to `osascript -` on stdin.
    pub async fn run_script(&self, command: &ScriptCommand) -> BuildResult<String> {
        tracing::debug!(script = %command, "Executing control script");
        let args = std::iter::once("-".to_string()).chain(command.args.iter().cloned());
        let invocation = Invocation::new(&self.osascript, args)
            .with_script(command.script.file_name(), command.script.body());
        execute(self.runner.as_ref(), &invocation).await
    }

    /// Run `[script-name, args...]`. Empty input is rejected without any call.
    pub async fn execute_script<S: AsRef<str>>(&self, argv: &[S]) -> BuildResult<String> {
        let command = ScriptCommand::parse(argv)?;
        self.run_script(&command).await
    }

    /// Create a VM and return its identifier.
    pub async fn create_vm(&self, vm: &NewVm<'_>) -> BuildResult<VmId> {
        let mut args = vec![
            "--name".to_string(),
            vm.name.to_string(),
            "--backend".to_string(),
            vm.backend.to_string(),
            "--arch".to_string(),
            vm.arch.to_string(),
        ];
        let script = match vm.source {
            Some(source) => {
                args.push("--source".into());
                args.push(source.display().to_string());
                ControlScript::CreateVmFromSource
            }
            None => ControlScript::CreateVm,
        };

        let output = self
            .run_script(&ScriptCommand::new(script, args))
            .await
            .map_err(|e| e.context("error creating VM"))?;
        Ok(VmId::new(require_identifier(&output, "VM id")?))
    }

    pub async fn delete(&self, vm_id: &VmId) -> BuildResult<()> {
        self.utmctl(&["delete", vm_id.as_str()]).await.map(|_| ())
    }

    pub async fn start(&self, vm_id: &VmId) -> BuildResult<()> {
        self.utmctl(&["start", vm_id.as_str()]).await.map(|_| ())
    }

    /// Stop a running VM, forcefully.
    pub async fn stop(&self, vm_id: &VmId) -> BuildResult<()> {
        self.utmctl(&["stop", vm_id.as_str()]).await.map(|_| ())
    }

    /// True while the VM is started, stopping or paused.
    pub async fn is_running(&self, vm_id: &VmId) -> BuildResult<bool> {
        let status = self.utmctl(&["status", vm_id.as_str()]).await?;
        Ok(matches!(status.as_str(), "started" | "stopping" | "paused"))
    }

    /// Register a `.utm` bundle with UTM and return the new VM's id.
    pub async fn import(&self, bundle: &Path) -> BuildResult<VmId> {
        let path = applescript_string(&bundle.display().to_string());
        match self.capabilities().import {
            ImportMethod::ImportNew => {
                let output = self
                    .osascript_inline(
                        "utm_import",
                        &format!(
                            r#"tell application "UTM" to import new virtual machine from POSIX file {}"#,
                            path
                        ),
                    )
                    .await
                    .map_err(|e| e.context("failed to import VM"))?;
                Ok(VmId::new(require_identifier(&output, "imported VM id")?))
            }
            ImportMethod::OpenBundle => {
                // Opening only creates a shortcut and reports nothing useful;
                // the VM keeps the name stored in its bundle.
                self.osascript_inline(
                    "utm_open",
                    &format!(r#"tell application "UTM" to open POSIX file {}"#, path),
                )
                .await
                .map_err(|e| e.context("failed to import VM"))?;

                let name = bundle
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let listing = self.utmctl(&["list"]).await?;
                find_listed_vm(&listing, &name)
                    .map(VmId::new)
                    .ok_or(BuildError::OutputMismatch {
                        what: format!("id of imported VM {:?}", name),
                        output: listing,
                    })
            }
        }
    }

    /// Export a VM to a `.utm` file.
    pub async fn export(&self, vm_id: &VmId, path: &Path) -> BuildResult<ExportOutcome> {
        match self.capabilities().export {
            ExportSupport::Manual => {
                tracing::info!("UTM API does not support exporting VMs yet.");
                tracing::info!(
                    "Please manually export the VM using 'Share...' action in UTM VM menu."
                );
                tracing::info!(path = %path.display(), "Please make sure the VM is exported to this path.");
                Ok(ExportOutcome::ManualActionRequired)
            }
            ExportSupport::Scripted => {
                let output = self
                    .osascript_inline(
                        "utm_export",
                        &format!(
                            r#"tell application "UTM" to export virtual machine id {} to POSIX file {}"#,
                            applescript_string(vm_id.as_str()),
                            applescript_string(&path.display().to_string())
                        ),
                    )
                    .await?;
                tracing::debug!(output = %output, "Export output");
                Ok(ExportOutcome::Exported)
            }
        }
    }

    /// Guest tools ISO that UTM downloaded itself, if this release has one.
    pub fn guest_tools_iso_path(&self) -> BuildResult<PathBuf> {
        match self.capabilities().guest_tools {
            GuestToolsSource::Unavailable => Err(BuildError::NotFound(
                "UTM driver does not provide guest additions".into(),
            )),
            GuestToolsSource::AppSupport => {
                let home = dirs::home_dir().ok_or_else(|| {
                    BuildError::Environment("cannot determine home directory".into())
                })?;
                let path = home.join(GUEST_TOOLS_RELATIVE);
                if !path.exists() {
                    return Err(BuildError::NotFound(format!(
                        "guest tools ISO not found at path: {}",
                        path.display()
                    )));
                }
                Ok(path)
            }
        }
    }

    async fn osascript_inline(&self, tag: &'static str, source: &str) -> BuildResult<String> {
        let invocation = Invocation::new(&self.osascript, ["-e", source]).tagged(tag);
        execute(self.runner.as_ref(), &invocation).await
    }
}

/// Quote a value as an AppleScript string literal.
fn applescript_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Find a VM id by name in `utmctl list` output (`UUID  Status  Name`).
fn find_listed_vm(listing: &str, name: &str) -> Option<String> {
    listing.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let id = fields.next()?;
        let _status = fields.next()?;
        let listed = fields.collect::<Vec<_>>().join(" ");
        (listed == name).then(|| id.to_string())
    })
}
