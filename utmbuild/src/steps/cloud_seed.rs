//! Step: hand the cloud-init seed to the guest.
//!
//! Either the `cd_path` ISO is attached as a non-removable virtio drive, or
//! QEMU is told to point NoCloud at the build's HTTP server through the SMBIOS
//! serial number.

use super::{detach_tracked, run_script, vm_id};
use crate::context::{BuildContext, DiskCategory};
use crate::driver::{ControlScript, ScriptCommand, VmId, lookup, require_identifier};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::{BuildError, BuildResult};

pub struct ConfigureCloudSeedStep {
    use_cd: bool,
    http_host: String,
    undo: Vec<(DiskCategory, ScriptCommand)>,
}

impl ConfigureCloudSeedStep {
    pub fn new(use_cd: bool, http_host: impl Into<String>) -> Self {
        Self {
            use_cd,
            http_host: http_host.into(),
            undo: Vec::new(),
        }
    }

    async fn attach_seed_iso(&mut self, ctx: &mut BuildContext, vm_id: &VmId) -> BuildResult<()> {
        ctx.ui.say("Attaching cloud init seed ISO...");
        let seed = ctx
            .cd_path
            .clone()
            .ok_or_else(|| BuildError::Config("no cd_files path found".into()))?;
        let code = lookup::controller_code("virtio")?;

        let attach = ScriptCommand::new(
            ControlScript::AttachIso,
            [
                vm_id.to_string(),
                "--interface".into(),
                code.to_string(),
                "--source".into(),
                seed.display().to_string(),
                "--removable".into(),
                "false".into(),
            ],
        );
        let output = run_script(ctx, &attach, "error attaching cloud init seed ISO").await?;
        let drive = require_identifier(&output, "drive id")?;

        let undo = ScriptCommand::new(ControlScript::RemoveDrive, [vm_id.to_string(), drive]);
        ctx.disk_unmount_commands
            .record(DiskCategory::CloudSeed, undo.clone())?;
        self.undo.push((DiskCategory::CloudSeed, undo));
        Ok(())
    }

    async fn serve_seed_over_http(&self, ctx: &mut BuildContext, vm_id: &VmId) -> BuildResult<()> {
        let port = ctx
            .http_port
            .ok_or_else(|| BuildError::InvalidState("http_port read before it was set".into()))?;

        ctx.ui.say("Configuring VM to send cloud init seed file...");
        let arg = format!(
            "-smbios type=1,serial=ds=nocloud-net;seedfrom=http://{}:{}/",
            self.http_host, port
        );
        let command = ScriptCommand::new(
            ControlScript::AddQemuAdditionalArgs,
            [vm_id.to_string(), "--args".into(), arg.clone()],
        );
        run_script(ctx, &command, "error adding QEMU additional arguments").await?;
        ctx.qemu_additional_arg = Some(arg);
        Ok(())
    }
}

#[async_trait]
impl BuildStep<BuildContext> for ConfigureCloudSeedStep {
    fn name(&self) -> &str {
        "configure_cloud_seed"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let vm_id = vm_id(ctx)?;
        if self.use_cd {
            self.attach_seed_iso(ctx, &vm_id).await?;
        } else {
            self.serve_seed_over_http(ctx, &vm_id).await?;
        }
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> BuildResult<()> {
        detach_tracked(ctx, &mut self.undo, "error detaching cloud init seed ISO").await
    }
}
