//! Step: start the VM.

use super::vm_id;
use crate::context::BuildContext;
use crate::driver::VmId;
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

/// Starts the VM and, on cleanup, stops it if it is still running.
#[derive(Default)]
pub struct StartVmStep {
    started: Option<VmId>,
}

impl StartVmStep {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildStep<BuildContext> for StartVmStep {
    fn name(&self) -> &str {
        "run"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let vm_id = vm_id(ctx)?;
        ctx.ui.say("Starting the virtual machine...");
        ctx.driver
            .start(&vm_id)
            .await
            .map_err(|e| e.context("error starting VM"))?;

        ctx.instance_id = Some(vm_id.to_string());
        self.started = Some(vm_id);
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> BuildResult<()> {
        let Some(vm_id) = self.started.take() else {
            return Ok(());
        };
        let running = match ctx.driver.is_running(&vm_id).await {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(vm_id = %vm_id, error = %e, "VM status query failed, assuming stopped");
                false
            }
        };
        if !running {
            return Ok(());
        }
        ctx.driver
            .stop(&vm_id)
            .await
            .map_err(|e| e.context("error shutting down VM"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverKind;
    use crate::executor::CommandOutput;
    use crate::testing::{Harness, TEST_VM_ID};

    #[tokio::test]
    async fn test_start_sets_instance_id() {
        let h = Harness::new(DriverKind::Utm46);
        let mut ctx = h.context_with_vm();
        let mut step = StartVmStep::new();

        step.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.instance_id.as_deref(), Some(TEST_VM_ID));
        assert_eq!(h.runner.utmctl_calls("start")[0].args, vec!["start", TEST_VM_ID]);
    }

    #[tokio::test]
    async fn test_cleanup_stops_running_vm() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_utmctl("status", CommandOutput::success("started\n"));
        let mut ctx = h.context_with_vm();
        let mut step = StartVmStep::new();

        step.run(&mut ctx).await.unwrap();
        step.cleanup(&mut ctx).await.unwrap();
        assert_eq!(h.runner.utmctl_calls("stop").len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_leaves_stopped_vm_alone() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_utmctl("status", CommandOutput::success("stopped"));
        let mut ctx = h.context_with_vm();
        let mut step = StartVmStep::new();

        step.run(&mut ctx).await.unwrap();
        step.cleanup(&mut ctx).await.unwrap();
        assert!(h.runner.utmctl_calls("stop").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_treats_failed_status_query_as_stopped() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_utmctl("status", CommandOutput::failure(1, "Virtual machine not found"));
        let mut ctx = h.context_with_vm();
        let mut step = StartVmStep::new();

        step.run(&mut ctx).await.unwrap();
        step.cleanup(&mut ctx).await.unwrap();
        assert_eq!(h.runner.utmctl_calls("status").len(), 1);
        assert!(h.runner.utmctl_calls("stop").is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_leaves_nothing_to_stop() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_utmctl("start", CommandOutput::failure(1, "Operation not available"));
        let mut ctx = h.context_with_vm();
        let mut step = StartVmStep::new();

        let err = step.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("error starting VM"));
        step.cleanup(&mut ctx).await.unwrap();
        assert!(h.runner.utmctl_calls("status").is_empty());
    }
}
