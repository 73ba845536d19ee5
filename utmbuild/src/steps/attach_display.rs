//! Step: add a QEMU display device.
//!
//! The display stays in the final image; it is only removed again when the
//! build stops before `remove_devices` has run.

use super::{run_script, vm_id};
use crate::context::BuildContext;
use crate::driver::{ControlScript, ScriptCommand};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

pub struct AttachDisplayStep {
    hardware: Option<String>,
    detach: Vec<ScriptCommand>,
}

impl AttachDisplayStep {
    pub fn new(hardware: Option<String>) -> Self {
        Self {
            hardware: hardware.filter(|h| !h.is_empty()),
            detach: Vec::new(),
        }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for AttachDisplayStep {
    fn name(&self) -> &str {
        "attach_display"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let Some(hardware) = self.hardware.clone() else {
            ctx.ui
                .say("No hardware type specified for display. Skipping display attachment.");
            return Ok(StepAction::Continue);
        };
        let vm_id = vm_id(ctx)?;

        ctx.ui
            .say(&format!("Attaching display with hardware type '{}'...", hardware));
        let attach = ScriptCommand::new(
            ControlScript::AddQemuDisplay,
            [vm_id.to_string(), "--hardware".into(), hardware.clone()],
        );
        run_script(ctx, &attach, "error attaching display").await?;

        self.detach.push(ScriptCommand::new(
            ControlScript::RemoveQemuDisplayByName,
            [vm_id.to_string(), "--hardware".into(), hardware.clone()],
        ));
        ctx.ui.message(&format!(
            "Display with hardware type '{}' attached successfully.",
            hardware
        ));
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> BuildResult<()> {
        let commands = std::mem::take(&mut self.detach);
        if commands.is_empty() || ctx.detached_isos {
            return Ok(());
        }

        ctx.ui.say("Detaching displays...");
        for command in &commands {
            if let Err(e) = run_script(ctx, command, "error detaching display").await {
                tracing::warn!(error = %e, "Failed to detach display");
            }
        }
        Ok(())
    }
}
