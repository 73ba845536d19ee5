//! Step: attach the boot ISO, cd_files ISO and guest additions ISO.

use super::{detach_tracked, run_script, vm_id};
use crate::context::{BuildContext, DiskCategory};
use crate::driver::{ControlScript, ScriptCommand, lookup, require_identifier};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use std::path::PathBuf;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Attaches every applicable ISO as a removable drive, in a fixed order:
/// boot ISO, cd_files, guest additions.
///
/// Each attach records a `remove_drive` undo command under its category.
pub struct AttachIsosStep {
    attach_boot_iso: bool,
    attach_cd_files: bool,
    iso_interface: String,
    /// Controller for the guest additions ISO; `None` unless mode is `attach`.
    guest_additions_interface: Option<String>,
    undo: Vec<(DiskCategory, ScriptCommand)>,
}

impl AttachIsosStep {
    pub fn new(iso_interface: impl Into<String>) -> Self {
        Self {
            attach_boot_iso: false,
            attach_cd_files: true,
            iso_interface: iso_interface.into(),
            guest_additions_interface: None,
            undo: Vec::new(),
        }
    }

    pub fn with_boot_iso(mut self) -> Self {
        self.attach_boot_iso = true;
        self
    }

    /// Leave `cd_path` alone, e.g. when the cloud seed step attaches it.
    pub fn without_cd_files(mut self) -> Self {
        self.attach_cd_files = false;
        self
    }

    pub fn with_guest_additions(mut self, interface: impl Into<String>) -> Self {
        self.guest_additions_interface = Some(interface.into());
        self
    }

    /// `(category, source, controller)` for everything that applies.
    fn mounts(&self, ctx: &BuildContext) -> BuildResult<Vec<(DiskCategory, PathBuf, String)>> {
        let mut mounts = Vec::new();
        if self.attach_boot_iso {
            let iso = ctx.iso_path.clone().ok_or_else(|| {
                BuildError::InvalidState("boot ISO path read before it was set".into())
            })?;
            mounts.push((DiskCategory::BootIso, iso, self.iso_interface.clone()));
        }
        if self.attach_cd_files
            && let Some(cd) = &ctx.cd_path
        {
            mounts.push((DiskCategory::CdFiles, cd.clone(), "usb".to_string()));
        }
        match &self.guest_additions_interface {
            Some(interface) => {
                let iso = ctx.guest_additions_path.clone().ok_or_else(|| {
                    BuildError::InvalidState("guest additions path read before it was set".into())
                })?;
                mounts.push((DiskCategory::GuestAdditions, iso, interface.clone()));
            }
            None => tracing::debug!("Not attaching guest additions"),
        }
        Ok(mounts)
    }
}

#[async_trait]
impl BuildStep<BuildContext> for AttachIsosStep {
    fn name(&self) -> &str {
        "attach_isos"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        ctx.ui.say("Mounting ISOs...");
        let mounts = self.mounts(ctx)?;
        if mounts.is_empty() {
            ctx.ui.message("No ISOs to mount; continuing...");
            return Ok(StepAction::Continue);
        }

        let vm_id = vm_id(ctx)?;
        for (category, source, controller) in mounts {
            let source = tokio::fs::canonicalize(&source).await.map_err(|e| {
                BuildError::Storage(format!(
                    "error resolving symlink for ISO {}: {}",
                    source.display(),
                    e
                ))
            })?;
            let code = lookup::controller_code(&controller)?;
            ctx.ui.message(&format!("Mounting {} ISO...", category));

            let attach = ScriptCommand::new(
                ControlScript::AttachIso,
                [
                    vm_id.to_string(),
                    "--interface".into(),
                    code.to_string(),
                    "--source".into(),
                    source.display().to_string(),
                ],
            );
            let output = run_script(ctx, &attach, "error attaching ISO").await?;
            let drive = require_identifier(&output, "drive id")?;

            let undo = ScriptCommand::new(ControlScript::RemoveDrive, [vm_id.to_string(), drive.clone()]);
            ctx.disk_unmount_commands.record(category, undo.clone())?;
            self.undo.push((category, undo));
            tracing::info!(vm_id = %vm_id, category = %category, drive = %drive, "ISO attached");
        }

        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> BuildResult<()> {
        detach_tracked(ctx, &mut self.undo, "error detaching ISO").await
    }
}
