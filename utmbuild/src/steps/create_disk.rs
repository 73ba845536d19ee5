//! Step: create the main hard drive and any additional drives.
//!
//! UTM creates and attaches a drive in one operation and cannot name it, so
//! there is nothing to undo here; the drives go away with the VM.

use super::{run_script, vm_id};
use crate::context::BuildContext;
use crate::driver::{ControlScript, ScriptCommand, VmId, lookup};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

pub struct CreateDisksStep {
    interface: String,
    /// Main drive first, then the additional ones.
    sizes_mib: Vec<u64>,
}

impl CreateDisksStep {
    pub fn new(interface: impl Into<String>, sizes_mib: Vec<u64>) -> Self {
        Self {
            interface: interface.into(),
            sizes_mib,
        }
    }
}

/// Add one drive of `size_mib` on the controller with enumeration `code`.
pub(super) async fn add_drive(ctx: &BuildContext, vm_id: &VmId, code: &str, size_mib: u64) -> BuildResult<()> {
    ctx.ui
        .say(&format!("Creating hard drive with size {} MiB...", size_mib));
    let command = ScriptCommand::new(
        ControlScript::AddDrive,
        [
            vm_id.to_string(),
            "--interface".into(),
            code.to_string(),
            "--size".into(),
            size_mib.to_string(),
        ],
    );
    run_script(ctx, &command, "error creating hard drive").await?;
    Ok(())
}

#[async_trait]
impl BuildStep<BuildContext> for CreateDisksStep {
    fn name(&self) -> &str {
        "create_disk"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let vm_id = vm_id(ctx)?;
        let code = lookup::controller_code(&self.interface)?;
        for &size in &self.sizes_mib {
            add_drive(ctx, &vm_id, code, size).await?;
        }
        tracing::info!(vm_id = %vm_id, count = self.sizes_mib.len(), "Hard drives created");
        Ok(StepAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverKind;
    use crate::executor::CommandOutput;
    use crate::testing::{Harness, TEST_VM_ID};
    use utmbuild_shared::errors::BuildError;

    #[tokio::test]
    async fn test_creates_main_and_additional_drives_in_order() {
        let h = Harness::new(DriverKind::Utm46);
        let mut ctx = h.context_with_vm();
        let mut step = CreateDisksStep::new("nvme", vec![40960, 2048]);

        step.run(&mut ctx).await.unwrap();

        let drives = h.runner.script_calls(ControlScript::AddDrive);
        assert_eq!(drives.len(), 2);
        assert_eq!(
            drives[0].args,
            vec!["-", TEST_VM_ID, "--interface", "QdIn", "--size", "40960"]
        );
        assert_eq!(drives[1].args[5], "2048");
        assert!(h.ui.said("Creating hard drive with size 2048 MiB..."));
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner.respond_script(
            ControlScript::AddDrive,
            CommandOutput::failure(1, "execution error: not enough space"),
        );
        let mut ctx = h.context_with_vm();
        let mut step = CreateDisksStep::new("virtio", vec![40960, 2048]);

        let err = step.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("error creating hard drive"));
        assert_eq!(h.runner.script_calls(ControlScript::AddDrive).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_interface_is_rejected_before_any_call() {
        let h = Harness::new(DriverKind::Utm46);
        let mut ctx = h.context_with_vm();
        let mut step = CreateDisksStep::new("sata", vec![1024]);

        assert!(matches!(step.run(&mut ctx).await, Err(BuildError::Config(_))));
        assert!(h.runner.calls().is_empty());
    }
}
