//! Step: create and customize a new VM.

use super::{deregister, run_script};
use crate::context::BuildContext;
use crate::driver::{ControlScript, NewVm, ScriptCommand, VmId};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Hardware and identity of the VM to create.
#[derive(Debug, Clone)]
pub struct VmSettings {
    pub name: String,
    /// Backend enumeration code (`QeMu`, `ApLe`).
    pub backend: String,
    pub arch: String,
    pub cpus: u32,
    pub memory_mib: u32,
    /// Firmware flags; `None` leaves UTM's default untouched.
    pub uefi_boot: Option<bool>,
    pub hypervisor: Option<bool>,
}

pub struct CreateVmStep {
    settings: VmSettings,
    /// Import the first drive from `BuildContext::iso_path` (cloud images).
    from_source: bool,
    keep_registered: bool,
    created: Option<VmId>,
}

impl CreateVmStep {
    pub fn new(settings: VmSettings, keep_registered: bool) -> Self {
        Self {
            settings,
            from_source: false,
            keep_registered,
            created: None,
        }
    }

    /// Create the VM with its first drive imported from the build's image.
    pub fn from_source(settings: VmSettings, keep_registered: bool) -> Self {
        Self {
            from_source: true,
            ..Self::new(settings, keep_registered)
        }
    }

    fn customize_command(&self, vm_id: &VmId) -> ScriptCommand {
        let s = &self.settings;
        let mut args = vec![
            vm_id.to_string(),
            "--cpus".into(),
            s.cpus.to_string(),
            "--memory".into(),
            s.memory_mib.to_string(),
            "--name".into(),
            s.name.clone(),
        ];
        if let Some(uefi) = s.uefi_boot {
            args.extend(["--uefi-boot".into(), uefi.to_string()]);
        }
        if let Some(hypervisor) = s.hypervisor {
            args.extend(["--use-hypervisor".into(), hypervisor.to_string()]);
        }
        ScriptCommand::new(ControlScript::CustomizeVm, args)
    }
}

#[async_trait]
impl BuildStep<BuildContext> for CreateVmStep {
    fn name(&self) -> &str {
        "create_vm"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        let source = if self.from_source {
            Some(ctx.iso_path.clone().ok_or_else(|| {
                BuildError::InvalidState("image path is required to create a VM from source".into())
            })?)
        } else {
            None
        };

        ctx.ui.say("Creating virtual machine...");
        let vm_id = ctx
            .driver
            .create_vm(&NewVm {
                name: &self.settings.name,
                backend: &self.settings.backend,
                arch: &self.settings.arch,
                source: source.as_deref(),
            })
            .await?;

        ctx.assign_vm_id(vm_id.clone())?;
        ctx.vm_name = Some(self.settings.name.clone());
        self.created = Some(vm_id.clone());
        tracing::info!(vm_id = %vm_id, name = %self.settings.name, "VM created");

        ctx.ui.say("Customizing virtual machine...");
        run_script(ctx, &self.customize_command(&vm_id), "error customizing VM").await?;

        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> BuildResult<()> {
        let Some(vm_id) = self.created.take() else {
            return Ok(());
        };
        deregister(ctx, &vm_id, self.keep_registered).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverKind;
    use crate::executor::CommandOutput;
    use crate::pipeline::{BoxedStep, Pipeline, PipelineState};
    use crate::testing::{Harness, TEST_VM_ID};
    use std::path::PathBuf;

    fn settings() -> VmSettings {
        VmSettings {
            name: "packer-test".into(),
            backend: "QeMu".into(),
            arch: "aarch64".into(),
            cpus: 2,
            memory_mib: 2048,
            uefi_boot: Some(true),
            hypervisor: Some(false),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_customizes() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_script(ControlScript::CreateVm, CommandOutput::success(TEST_VM_ID));
        let mut ctx = h.context();
        let mut step = CreateVmStep::new(settings(), false);

        assert_eq!(step.run(&mut ctx).await.unwrap(), StepAction::Continue);
        assert_eq!(ctx.vm_id().unwrap().as_str(), TEST_VM_ID);
        assert_eq!(ctx.vm_name.as_deref(), Some("packer-test"));

        let customize = h.runner.script_calls(ControlScript::CustomizeVm);
        assert_eq!(customize.len(), 1);
        assert_eq!(
            customize[0].args,
            vec![
                "-", TEST_VM_ID, "--cpus", "2", "--memory", "2048", "--name", "packer-test",
                "--uefi-boot", "true", "--use-hypervisor", "false"
            ]
        );
    }

    #[tokio::test]
    async fn test_unparseable_create_output_fails_without_identity() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_script(ControlScript::CreateVm, CommandOutput::success("missing value"));
        let mut ctx = h.context();
        let mut step = CreateVmStep::new(settings(), false);

        assert!(matches!(
            step.run(&mut ctx).await,
            Err(BuildError::OutputMismatch { .. })
        ));
        assert!(ctx.vm_id().is_none());

        // Nothing to delete.
        step.cleanup(&mut ctx).await.unwrap();
        assert!(h.runner.utmctl_calls("delete").is_empty());
    }

    #[tokio::test]
    async fn test_customize_failure_halts_and_deletes_once_despite_keep_registered() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_script(ControlScript::CreateVm, CommandOutput::success(TEST_VM_ID));
        h.runner.respond_script(
            ControlScript::CustomizeVm,
            CommandOutput::failure(1, "execution error: Invalid memory size"),
        );
        let mut ctx = h.context();
        let steps: Vec<BoxedStep<BuildContext>> =
            vec![Box::new(CreateVmStep::new(settings(), true))];

        let report = Pipeline::new(steps).run(&mut ctx).await;

        assert_eq!(report.state, PipelineState::Halted);
        let deletes = h.runner.utmctl_calls("delete");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].args, vec!["delete", TEST_VM_ID]);
        assert!(h.ui.errored("error customizing VM"));
        assert!(matches!(ctx.error(), Some(BuildError::Control { .. })));
    }

    /// Raises the cancel flag from inside its own run.
    struct CancelInsideStep;

    #[async_trait]
    impl BuildStep<BuildContext> for CancelInsideStep {
        fn name(&self) -> &str {
            "cancel_inside"
        }

        async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
            ctx.cancel.cancel();
            Ok(StepAction::Continue)
        }
    }

    #[tokio::test]
    async fn test_cancel_in_last_step_reports_cancelled_and_deletes() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_script(ControlScript::CreateVm, CommandOutput::success(TEST_VM_ID));
        let mut ctx = h.context();
        let steps: Vec<BoxedStep<BuildContext>> = vec![
            Box::new(CreateVmStep::new(settings(), true)),
            Box::new(CancelInsideStep),
        ];

        let report = Pipeline::new(steps).run(&mut ctx).await;

        // The VM is deleted, so the run must not look successful.
        assert_eq!(report.state, PipelineState::Cancelled);
        assert_eq!(h.runner.utmctl_calls("delete").len(), 1);
    }

    #[tokio::test]
    async fn test_keep_registered_after_success() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_script(ControlScript::CreateVm, CommandOutput::success(TEST_VM_ID));
        let mut ctx = h.context();
        let mut step = CreateVmStep::new(settings(), true);

        step.run(&mut ctx).await.unwrap();
        step.cleanup(&mut ctx).await.unwrap();

        assert!(h.runner.utmctl_calls("delete").is_empty());
        assert!(h.ui.said("keep_registered = true"));
    }

    #[tokio::test]
    async fn test_delete_failure_is_returned_from_cleanup() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner
            .respond_script(ControlScript::CreateVm, CommandOutput::success(TEST_VM_ID));
        h.runner
            .respond_utmctl("delete", CommandOutput::failure(1, "Virtual machine not found"));
        let mut ctx = h.context();
        let mut step = CreateVmStep::new(settings(), false);

        step.run(&mut ctx).await.unwrap();
        let err = step.cleanup(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("error deleting VM"));
    }

    #[tokio::test]
    async fn test_from_source_uses_image_path() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner.respond_script(
            ControlScript::CreateVmFromSource,
            CommandOutput::success(format!("virtual machine id {}", TEST_VM_ID)),
        );
        let mut ctx = h.context();
        ctx.iso_path = Some(PathBuf::from("/images/jammy.qcow2"));
        let mut step = CreateVmStep::from_source(settings(), false);

        step.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.vm_id().unwrap().as_str(), TEST_VM_ID);
        assert!(h.runner.script_calls(ControlScript::CreateVm).is_empty());
    }
}
