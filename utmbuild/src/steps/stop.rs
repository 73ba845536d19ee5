//! Step: stop the VM once the guest is ready to be captured.

use super::vm_id;
use crate::context::BuildContext;
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

pub struct StopVmStep {
    /// On failure, ask the operator to stop the VM and carry on.
    manual_fallback: bool,
}

impl StopVmStep {
    pub fn new(manual_fallback: bool) -> Self {
        Self { manual_fallback }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for StopVmStep {
    fn name(&self) -> &str {
        "stop_vm"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let vm_id = vm_id(ctx)?;
        ctx.ui.say("Stopping virtual machine...");

        match ctx.driver.stop(&vm_id).await {
            Ok(()) => {
                tracing::info!(vm_id = %vm_id, "VM stopped");
                Ok(StepAction::Continue)
            }
            Err(e) if self.manual_fallback => {
                tracing::warn!(vm_id = %vm_id, error = %e, "Automatic stop failed");
                ctx.ui
                    .warn("Automatic stop failed. Please stop the machine manually.");
                Ok(StepAction::Continue)
            }
            Err(e) => Err(e.context("error stopping VM")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverKind;
    use crate::executor::CommandOutput;
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_stop_success() {
        let h = Harness::new(DriverKind::Utm46);
        let mut ctx = h.context_with_vm();

        let action = StopVmStep::new(false).run(&mut ctx).await.unwrap();
        assert_eq!(action, StepAction::Continue);
        assert_eq!(h.runner.utmctl_calls("stop").len(), 1);
        assert!(!h.ui.warned("Automatic stop failed"));
    }

    #[tokio::test]
    async fn test_failure_with_fallback_warns_and_continues() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_utmctl("stop", CommandOutput::failure(1, "Operation not available"));
        let mut ctx = h.context_with_vm();

        let action = StopVmStep::new(true).run(&mut ctx).await.unwrap();
        assert_eq!(action, StepAction::Continue);
        assert!(h.ui.warned("Please stop the machine manually"));
    }

    #[tokio::test]
    async fn test_failure_without_fallback_is_an_error() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_utmctl("stop", CommandOutput::failure(1, "Operation not available"));
        let mut ctx = h.context_with_vm();

        let err = StopVmStep::new(false).run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("error stopping VM"));
    }
}
