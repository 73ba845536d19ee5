//! Step: undo build-time VM tweaks and export the VM to a `.utm` file.

use super::{run_script, vm_id};
use crate::config::ExportConfig;
use crate::context::BuildContext;
use crate::driver::{ControlScript, ExportOutcome, ScriptCommand};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use std::path::PathBuf;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Removes the communicator port forward and the injected QEMU argument, then
/// exports. Either removal failing stops the export: the bundle must not carry
/// build-only settings.
pub struct ExportStep {
    config: ExportConfig,
    skip_nat_mapping: bool,
}

impl ExportStep {
    pub fn new(config: ExportConfig, skip_nat_mapping: bool) -> Self {
        Self {
            config,
            skip_nat_mapping,
        }
    }

    fn output_path(&self, vm_name: &str) -> BuildResult<PathBuf> {
        let dir = self.config.output_directory(vm_name);
        let dir = std::path::absolute(&dir).map_err(|e| {
            BuildError::Storage(format!(
                "error getting absolute path of output directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let filename = self.config.output_filename(vm_name);
        Ok(dir.join(format!("{}.{}", filename, self.config.format)))
    }
}

#[async_trait]
impl BuildStep<BuildContext> for ExportStep {
    fn name(&self) -> &str {
        "export"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        if self.config.skip_export {
            ctx.ui.say("Skipping export of virtual machine...");
            return Ok(StepAction::Continue);
        }
        let vm_id = vm_id(ctx)?;
        let vm_name = ctx
            .vm_name
            .clone()
            .ok_or_else(|| BuildError::InvalidState("VM name read before it was set".into()))?;
        ctx.ui.say("Preparing to export machine...");

        if !self.skip_nat_mapping
            && let Some(port) = ctx.comm_host_port
        {
            ctx.ui.message(&format!(
                "Deleting forwarded port mapping for the communicator (SSH, WinRM, etc) (host port {})",
                port
            ));
            let command = ScriptCommand::new(
                ControlScript::ClearPortForwards,
                [vm_id.to_string(), "--index".into(), "1".into(), port.to_string()],
            );
            run_script(ctx, &command, "error deleting port forwarding rule").await?;
        }

        if let Some(arg) = ctx.qemu_additional_arg.clone() {
            ctx.ui
                .message(&format!("Removing QEMU additional argument {}", arg));
            let command = ScriptCommand::new(
                ControlScript::RemoveQemuAdditionalArgs,
                [vm_id.to_string(), "--args".into(), arg],
            );
            run_script(ctx, &command, "error removing QEMU additional arguments").await?;
        }

        let path = self.output_path(&vm_name)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                BuildError::Storage(format!(
                    "error creating output directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        ctx.ui.say("Exporting virtual machine...");
        let outcome = ctx
            .driver
            .export(&vm_id, &path)
            .await
            .map_err(|e| e.context("error exporting VM"))?;
        if outcome == ExportOutcome::ManualActionRequired {
            ctx.ui.message(&format!(
                "UTM cannot export by script; use 'Share...' in the VM menu to export to {}",
                path.display()
            ));
        }

        tracing::info!(vm_id = %vm_id, path = %path.display(), "Export finished");
        ctx.export_path = Some(path);
        Ok(StepAction::Continue)
    }
}
