//! Step: remove the drive UTM adds to every new VM.

use super::{run_script, vm_id};
use crate::context::BuildContext;
use crate::driver::{ControlScript, ScriptCommand};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

pub struct RemoveFirstDiskStep;

#[async_trait]
impl BuildStep<BuildContext> for RemoveFirstDiskStep {
    fn name(&self) -> &str {
        "remove_first_disk"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let vm_id = vm_id(ctx)?;
        ctx.ui.say("Removing first drive");
        let command = ScriptCommand::new(ControlScript::RemoveFirstDrive, [vm_id.to_string()]);
        run_script(ctx, &command, "error removing first drive").await?;
        Ok(StepAction::Continue)
    }
}
