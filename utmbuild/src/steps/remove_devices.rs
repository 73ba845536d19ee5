//! Step: detach every tracked removable device in one pass.

use super::run_script;
use crate::context::{BuildContext, DiskCategory};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

/// Runs all outstanding undo commands, whichever step recorded them, then
/// marks devices as detached so attach steps skip their own cleanup.
pub struct RemoveDevicesStep {
    /// Leave the boot ISO in the exported bundle.
    bundle_iso: bool,
}

impl RemoveDevicesStep {
    pub fn new(bundle_iso: bool) -> Self {
        Self { bundle_iso }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for RemoveDevicesStep {
    fn name(&self) -> &str {
        "remove_devices"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        if ctx.disk_unmount_commands.is_empty() {
            tracing::debug!("No devices to detach");
            return Ok(StepAction::Continue);
        }

        for category in ctx.disk_unmount_commands.categories() {
            if category == DiskCategory::BootIso && self.bundle_iso {
                tracing::info!("Keeping boot ISO attached for bundling");
                continue;
            }
            let Some(command) = ctx.disk_unmount_commands.get(category).cloned() else {
                continue;
            };
            run_script(ctx, &command, "error detaching ISO").await?;
            ctx.disk_unmount_commands.remove(category);
            tracing::info!(category = %category, "Device detached");
        }

        ctx.detached_isos = true;
        Ok(StepAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ControlScript, DriverKind, ScriptCommand};
    use crate::executor::CommandOutput;
    use crate::pipeline::{BoxedStep, Pipeline, PipelineState};
    use crate::steps::{AttachIsosStep, ConfigureCloudSeedStep};
    use crate::testing::{Harness, TEST_VM_ID};
    use tempfile::TempDir;

    const BOOT_DRIVE: &str = "11111111-2222-4333-8444-555555555555";
    const CD_DRIVE: &str = "66666666-7777-4888-9999-AAAAAAAAAAAA";
    const SEED_DRIVE: &str = "0F0E0D0C-0B0A-4908-8706-050403020100";
    const GA_DRIVE: &str = "ABCDEF01-2345-4678-89AB-CDEF01234567";

    fn undo(drive: &str) -> ScriptCommand {
        ScriptCommand::new(ControlScript::RemoveDrive, [TEST_VM_ID, drive])
    }

    #[tokio::test]
    async fn test_no_records_makes_no_calls() {
        let h = Harness::new(DriverKind::Utm46);
        let mut ctx = h.context_with_vm();
        let mut step = RemoveDevicesStep::new(false);

        assert_eq!(step.run(&mut ctx).await.unwrap(), StepAction::Continue);
        assert!(h.runner.calls().is_empty());
        assert!(!ctx.detached_isos);
    }

    #[tokio::test]
    async fn test_runs_every_recorded_undo() {
        let h = Harness::new(DriverKind::Utm46);
        let mut ctx = h.context_with_vm();
        ctx.disk_unmount_commands
            .record(DiskCategory::BootIso, undo(BOOT_DRIVE))
            .unwrap();
        ctx.disk_unmount_commands
            .record(DiskCategory::CloudSeed, undo(CD_DRIVE))
            .unwrap();
        let mut step = RemoveDevicesStep::new(false);

        step.run(&mut ctx).await.unwrap();

        let removes = h.runner.script_calls(ControlScript::RemoveDrive);
        assert_eq!(removes.len(), 2);
        assert_eq!(removes[0].args, vec!["-", TEST_VM_ID, BOOT_DRIVE]);
        assert_eq!(removes[1].args, vec!["-", TEST_VM_ID, CD_DRIVE]);
        assert!(ctx.disk_unmount_commands.is_empty());
        assert!(ctx.detached_isos);
    }

    #[tokio::test]
    async fn test_detach_failure_halts_without_marking() {
        let h = Harness::new(DriverKind::Utm46);
        h.runner.respond_script(
            ControlScript::RemoveDrive,
            CommandOutput::failure(1, "execution error: drive is busy"),
        );
        let mut ctx = h.context_with_vm();
        ctx.disk_unmount_commands
            .record(DiskCategory::CdFiles, undo(CD_DRIVE))
            .unwrap();
        let mut step = RemoveDevicesStep::new(false);

        let err = step.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("error detaching ISO"));
        assert!(!ctx.detached_isos);
        assert!(ctx.disk_unmount_commands.contains(DiskCategory::CdFiles));
    }

    #[tokio::test]
    async fn test_attach_then_bulk_remove_keeps_bundled_boot_iso() {
        let dir = TempDir::new().unwrap();
        let boot = dir.path().join("boot.iso");
        let cd = dir.path().join("cidata.iso");
        std::fs::write(&boot, b"boot").unwrap();
        std::fs::write(&cd, b"cd").unwrap();

        let h = Harness::new(DriverKind::Utm46);
        h.runner.queue("attach_iso.applescript", CommandOutput::success(BOOT_DRIVE));
        h.runner.queue("attach_iso.applescript", CommandOutput::success(CD_DRIVE));
        let mut ctx = h.context_with_vm();
        ctx.iso_path = Some(boot);
        ctx.cd_path = Some(cd);

        let steps: Vec<BoxedStep<BuildContext>> = vec![
            Box::new(AttachIsosStep::new("usb").with_boot_iso()),
            Box::new(RemoveDevicesStep::new(true)),
        ];
        let report = Pipeline::new(steps).run(&mut ctx).await;

        assert_eq!(report.state, PipelineState::Completed);
        assert!(ctx.detached_isos);
        // Only cd_files was detached; the attach step's cleanup skipped.
        let removes = h.runner.script_calls(ControlScript::RemoveDrive);
        assert_eq!(removes.len(), 1);
        assert_eq!(removes[0].args, vec!["-", TEST_VM_ID, CD_DRIVE]);
        assert_eq!(
            ctx.disk_unmount_commands.categories(),
            vec![DiskCategory::BootIso]
        );
    }

    #[tokio::test]
    async fn test_every_device_combination_is_fully_detached() {
        for mask in 0..8u8 {
            for bundle_iso in [false, true] {
                let (boot, seed, ga) = (mask & 1 != 0, mask & 2 != 0, mask & 4 != 0);
                let label = format!("boot={} seed={} ga={} bundle={}", boot, seed, ga, bundle_iso);

                let dir = TempDir::new().unwrap();
                let file = |name: &str| {
                    let path = dir.path().join(name);
                    std::fs::write(&path, name).unwrap();
                    path
                };
                let h = Harness::new(DriverKind::Utm46);
                let mut ctx = h.context_with_vm();
                ctx.iso_path = Some(file("boot.iso"));
                ctx.cd_path = Some(file("cidata.iso"));
                ctx.guest_additions_path = Some(file("utm-guest-tools.iso"));

                // Attach responses are consumed in step order.
                let mut steps: Vec<BoxedStep<BuildContext>> = Vec::new();
                let mut attached = Vec::new();
                if seed {
                    h.runner
                        .queue("attach_iso.applescript", CommandOutput::success(SEED_DRIVE));
                    steps.push(Box::new(ConfigureCloudSeedStep::new(true, "192.168.75.1")));
                    attached.push(SEED_DRIVE);
                }
                let mut attach = AttachIsosStep::new("usb").without_cd_files();
                if boot {
                    h.runner
                        .queue("attach_iso.applescript", CommandOutput::success(BOOT_DRIVE));
                    attach = attach.with_boot_iso();
                    if !bundle_iso {
                        attached.push(BOOT_DRIVE);
                    }
                }
                if ga {
                    h.runner
                        .queue("attach_iso.applescript", CommandOutput::success(GA_DRIVE));
                    attach = attach.with_guest_additions("usb");
                    attached.push(GA_DRIVE);
                }
                steps.push(Box::new(attach));
                steps.push(Box::new(RemoveDevicesStep::new(bundle_iso)));

                let report = Pipeline::new(steps).run(&mut ctx).await;
                assert_eq!(report.state, PipelineState::Completed, "{}", label);

                let mut removed: Vec<String> = h
                    .runner
                    .script_calls(ControlScript::RemoveDrive)
                    .into_iter()
                    .map(|call| call.args[2].clone())
                    .collect();
                removed.sort();
                attached.sort();
                assert_eq!(removed, attached, "{}", label);

                let kept = if boot && bundle_iso {
                    vec![DiskCategory::BootIso]
                } else {
                    Vec::new()
                };
                assert_eq!(ctx.disk_unmount_commands.categories(), kept, "{}", label);
                assert_eq!(ctx.detached_isos, boot || seed || ga, "{}", label);
            }
        }
    }
}
