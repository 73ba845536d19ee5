//! Step: attach a private copy of the cloud image as the boot drive.

use super::create_disk::add_drive;
use super::{run_script, vm_id};
use crate::context::BuildContext;
use crate::driver::{ControlScript, ScriptCommand, lookup};
use crate::executor::{Invocation, execute};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use tempfile::TempPath;
use utmbuild_shared::errors::{BuildError, BuildResult};

const QEMU_IMG: &str = "qemu-img";

/// Copies the cloud image, optionally grows it with `qemu-img`, attaches it
/// as a non-removable drive and adds any extra drives.
///
/// The copy is deleted on cleanup.
pub struct CreateCloudDiskStep {
    interface: String,
    /// Grow the copy to this size before attaching.
    resize_mib: Option<u64>,
    additional_sizes_mib: Vec<u64>,
    copy: Option<TempPath>,
}

impl CreateCloudDiskStep {
    pub fn new(interface: impl Into<String>, resize_mib: Option<u64>, additional_sizes_mib: Vec<u64>) -> Self {
        Self {
            interface: interface.into(),
            resize_mib,
            additional_sizes_mib,
            copy: None,
        }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for CreateCloudDiskStep {
    fn name(&self) -> &str {
        "create_cloud_disk"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let vm_id = vm_id(ctx)?;
        let image = ctx
            .iso_path
            .clone()
            .ok_or_else(|| BuildError::InvalidState("cloud image path read before it was set".into()))?;
        let code = lookup::controller_code(&self.interface)?;

        let copy = tempfile::Builder::new()
            .prefix("packer")
            .suffix(".img")
            .tempfile()
            .map_err(|e| {
                BuildError::Storage(format!("error creating temporary file for cloud image: {}", e))
            })?
            .into_temp_path();
        tracing::debug!(path = %copy.display(), "Temporary cloud image");

        ctx.ui.say("Creating a copy of the original cloud image...");
        tokio::fs::copy(&image, &copy)
            .await
            .map_err(|e| BuildError::Storage(format!("error copying cloud image: {}", e)))?;
        let copy_path = copy.to_path_buf();
        self.copy = Some(copy);

        if let Some(size) = self.resize_mib {
            ctx.ui
                .say(&format!("Resizing cloud image with size {} MiB...", size));
            let resize = Invocation::new(
                QEMU_IMG,
                [
                    "resize".to_string(),
                    copy_path.display().to_string(),
                    format!("{}M", size),
                ],
            );
            execute(ctx.driver.runner(), &resize)
                .await
                .map_err(|e| e.context("error resizing cloud image"))?;
            ctx.ui.say("Cloud image resized successfully.");
        }

        let attach = ScriptCommand::new(
            ControlScript::AttachIso,
            [
                vm_id.to_string(),
                "--interface".into(),
                code.to_string(),
                "--source".into(),
                copy_path.display().to_string(),
                "--removable".into(),
                "false".into(),
            ],
        );
        run_script(ctx, &attach, "error creating hard drive").await?;

        for &size in &self.additional_sizes_mib {
            add_drive(ctx, &vm_id, code, size).await?;
        }

        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> BuildResult<()> {
        let Some(copy) = self.copy.take() else {
            return Ok(());
        };
        ctx.ui.say("Cleaning up copied and resized cloud image...");
        copy.close().map_err(|e| {
            BuildError::Storage(format!("error removing copied and resized cloud image: {}", e))
        })
    }
}
