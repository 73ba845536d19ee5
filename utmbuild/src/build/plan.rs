//! Fixed step order for each build kind.

use crate::config::{BuildConfig, BuildKind, GuestAdditionsMode};
use crate::context::BuildContext;
use crate::driver::lookup;
use crate::pipeline::BoxedStep;
use crate::steps::{
    AttachDisplayStep, AttachIsosStep, BootWaitStep, ConfigureCloudSeedStep, ConfigureVncStep,
    CreateCloudDiskStep, CreateDisksStep, CreateVmStep, DownloadGuestAdditionsStep, ExportStep,
    ImportStep, PortForwardStep, RemoveDevicesStep, RemoveFirstDiskStep, StartVmStep, StopVmStep,
    VmSettings,
};
use std::time::Duration;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Steps for `config`, in the order they run.
///
/// ```text
/// iso:    guest additions → create vm → remove first disk → create disks
///         → attach isos (boot) → vnc → port forward → display
///         → start → boot wait → stop → remove devices → export
/// cloud:  guest additions → create vm (from source) | create vm + cloud disk
///         → cloud seed → attach isos → port forward → display
///         → start → boot wait → stop → remove devices → export
/// import: import → attach isos → port forward → display
///         → start → boot wait → stop → remove devices → export
/// ```
///
/// Expects a sanitized config.
pub fn execution_plan(config: &BuildConfig) -> BuildResult<Vec<BoxedStep<BuildContext>>> {
    let mut steps: Vec<BoxedStep<BuildContext>> = Vec::new();

    match config.kind {
        BuildKind::Iso => {
            steps.push(guest_additions(config));
            steps.push(Box::new(CreateVmStep::new(
                vm_settings(config, true)?,
                config.keep_registered,
            )));
            steps.push(Box::new(RemoveFirstDiskStep));
            let mut sizes = vec![config.disk_size_mib];
            sizes.extend(&config.disk_additional_size_mib);
            steps.push(Box::new(CreateDisksStep::new(
                config.hard_drive_interface.clone(),
                sizes,
            )));
            steps.push(Box::new(attach_isos(config).with_boot_iso()));
            steps.push(Box::new(ConfigureVncStep::new(config.vnc.clone())));
        }
        BuildKind::Cloud => {
            steps.push(guest_additions(config));
            let settings = vm_settings(config, false)?;
            if config.resize_cloud_image {
                steps.push(Box::new(CreateVmStep::new(settings, config.keep_registered)));
                steps.push(Box::new(CreateCloudDiskStep::new(
                    config.hard_drive_interface.clone(),
                    Some(config.disk_size_mib),
                    config.disk_additional_size_mib.clone(),
                )));
            } else {
                steps.push(Box::new(CreateVmStep::from_source(
                    settings,
                    config.keep_registered,
                )));
            }
            steps.push(Box::new(ConfigureCloudSeedStep::new(
                config.use_cd,
                config.http_host.clone(),
            )));
            let isos = attach_isos(config);
            steps.push(Box::new(if config.use_cd {
                isos.without_cd_files()
            } else {
                isos
            }));
        }
        BuildKind::Import => {
            let bundle = config.source_path.clone().ok_or_else(|| {
                BuildError::Config("source_path is required for import builds".into())
            })?;
            steps.push(Box::new(ImportStep::new(
                bundle,
                config.vm_name.clone(),
                config.keep_registered,
            )));
            steps.push(Box::new(attach_isos(config)));
        }
    }

    steps.push(Box::new(PortForwardStep::new(config.comm.clone())));
    steps.push(Box::new(AttachDisplayStep::new(
        config.display_hardware_type.clone(),
    )));
    steps.push(Box::new(StartVmStep::new()));
    steps.push(Box::new(BootWaitStep::new(Duration::from_secs(
        config.boot_wait_secs,
    ))));
    steps.push(Box::new(StopVmStep::new(config.manual_stop_fallback)));
    steps.push(Box::new(RemoveDevicesStep::new(config.bundle_iso)));
    steps.push(Box::new(ExportStep::new(
        config.export.clone(),
        config.comm.skip_nat_mapping,
    )));

    Ok(steps)
}

fn guest_additions(config: &BuildConfig) -> BoxedStep<BuildContext> {
    Box::new(DownloadGuestAdditionsStep::new(
        config.guest_additions.clone(),
        config.cache_dir.clone(),
    ))
}

fn attach_isos(config: &BuildConfig) -> AttachIsosStep {
    let step = AttachIsosStep::new(config.iso_interface.clone());
    match config.guest_additions.mode() {
        GuestAdditionsMode::Attach => step.with_guest_additions(config.guest_additions.interface.clone()),
        _ => step,
    }
}

/// Firmware flags are only set for installs from ISO; cloud images keep
/// UTM's defaults.
fn vm_settings(config: &BuildConfig, firmware_flags: bool) -> BuildResult<VmSettings> {
    Ok(VmSettings {
        name: config.vm_name.clone(),
        backend: lookup::backend_code(&config.vm_backend)?.to_string(),
        arch: config.vm_arch.clone(),
        cpus: config.cpus,
        memory_mib: config.memory_mib,
        uefi_boot: firmware_flags.then_some(config.uefi_boot),
        hypervisor: firmware_flags.then_some(config.hypervisor),
    })
}
