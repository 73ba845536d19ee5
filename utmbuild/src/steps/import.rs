//! Step: register an existing `.utm` bundle and rename it for the build.

use super::{deregister, run_script};
use crate::context::BuildContext;
use crate::driver::{ControlScript, ScriptCommand, VmId};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use std::path::PathBuf;
use utmbuild_shared::errors::BuildResult;

pub struct ImportStep {
    bundle: PathBuf,
    name: String,
    keep_registered: bool,
    imported: Option<VmId>,
}

impl ImportStep {
    pub fn new(bundle: impl Into<PathBuf>, name: impl Into<String>, keep_registered: bool) -> Self {
        Self {
            bundle: bundle.into(),
            name: name.into(),
            keep_registered,
            imported: None,
        }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for ImportStep {
    fn name(&self) -> &str {
        "import"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        ctx.ui
            .say(&format!("Importing VM: {}", self.bundle.display()));
        let vm_id = ctx
            .driver
            .import(&self.bundle)
            .await
            .map_err(|e| e.context("error importing VM"))?;

        ctx.assign_vm_id(vm_id.clone())?;
        self.imported = Some(vm_id.clone());
        tracing::info!(vm_id = %vm_id, bundle = %self.bundle.display(), "VM imported");

        let rename = ScriptCommand::new(
            ControlScript::CustomizeVm,
            [vm_id.to_string(), "--name".into(), self.name.clone()],
        );
        run_script(ctx, &rename, "error setting VM name").await?;
        ctx.vm_name = Some(self.name.clone());

        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> BuildResult<()> {
        match self.imported.take() {
            Some(vm_id) => deregister(ctx, &vm_id, self.keep_registered).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverKind;
    use crate::executor::CommandOutput;
    use crate::pipeline::PipelineContext;
    use crate::testing::{Harness, TEST_VM_ID};
    use utmbuild_shared::errors::BuildError;

    #[tokio::test]
    async fn test_import_renames_the_new_vm() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner.respond(
            "utm_import",
            CommandOutput::success(format!("virtual machine id {}", TEST_VM_ID)),
        );
        let mut ctx = h.context();
        let mut step = ImportStep::new("/vms/base.utm", "packer-imported", false);

        assert_eq!(step.run(&mut ctx).await.unwrap(), StepAction::Continue);
        assert_eq!(ctx.vm_id().unwrap().as_str(), TEST_VM_ID);
        assert_eq!(ctx.vm_name.as_deref(), Some("packer-imported"));

        let renames = h.runner.script_calls(ControlScript::CustomizeVm);
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[0].args, vec!["-", TEST_VM_ID, "--name", "packer-imported"]);
    }

    #[tokio::test]
    async fn test_rename_failure_deletes_imported_vm() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner.respond(
            "utm_import",
            CommandOutput::success(format!("virtual machine id {}", TEST_VM_ID)),
        );
        h.runner.respond_script(
            ControlScript::CustomizeVm,
            CommandOutput::failure(1, "execution error"),
        );
        let mut ctx = h.context();
        let mut step = ImportStep::new("/vms/base.utm", "packer-imported", true);

        let err = step.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Control { .. }));
        ctx.record_error(err);

        step.cleanup(&mut ctx).await.unwrap();
        let deletes = h.runner.utmctl_calls("delete");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].args, vec!["delete", TEST_VM_ID]);
    }

    #[tokio::test]
    async fn test_import_on_4_5_finds_vm_by_bundle_name() {
        let h = Harness::new(DriverKind::Utm45);
        h.runner.respond_utmctl(
            "list",
            CommandOutput::success(format!("UUID  Status  Name\n{}  stopped  base\n", TEST_VM_ID)),
        );
        let mut ctx = h.context();
        let mut step = ImportStep::new("/vms/base.utm", "packer-imported", false);

        step.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.vm_id().unwrap().as_str(), TEST_VM_ID);
        assert_eq!(h.runner.calls_for("utm_open").len(), 1);
    }
}
