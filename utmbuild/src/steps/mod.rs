//! Build steps.
//!
//! Each step implements [`BuildStep<BuildContext>`](crate::pipeline::BuildStep).
//! Step configuration is passed at construction; everything that flows
//! between steps goes through [`BuildContext`].
//!
//! Steps that attach something removable keep the exact undo command they
//! need and skip their own cleanup once `remove_devices` has detached
//! everything (`BuildContext::detached_isos`).

mod attach_display;
mod attach_iso;
mod cloud_disk;
mod cloud_seed;
mod configure_vnc;
mod create_disk;
mod create_vm;
mod export;
mod guest_additions;
mod import;
mod port_forward;
mod remove_devices;
mod remove_first_disk;
mod run;
mod stop;
mod wait;

pub use attach_display::AttachDisplayStep;
pub use attach_iso::AttachIsosStep;
pub use cloud_disk::CreateCloudDiskStep;
pub use cloud_seed::ConfigureCloudSeedStep;
pub use configure_vnc::ConfigureVncStep;
pub use create_disk::CreateDisksStep;
pub use create_vm::{CreateVmStep, VmSettings};
pub use export::ExportStep;
pub use guest_additions::DownloadGuestAdditionsStep;
pub use import::ImportStep;
pub use port_forward::PortForwardStep;
pub use remove_devices::RemoveDevicesStep;
pub use remove_first_disk::RemoveFirstDiskStep;
pub use run::StartVmStep;
pub use stop::StopVmStep;
pub use wait::BootWaitStep;

use crate::context::{BuildContext, DiskCategory};
use crate::driver::{ScriptCommand, VmId};
use tokio::net::TcpListener;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Run a control script, naming the failed operation in the error.
async fn run_script(ctx: &BuildContext, command: &ScriptCommand, operation: &str) -> BuildResult<String> {
    ctx.driver
        .run_script(command)
        .await
        .map_err(|e| e.context(operation))
}

/// Owned copy of the VM id for steps that need one.
fn vm_id(ctx: &BuildContext) -> BuildResult<VmId> {
    ctx.require_vm_id().cloned()
}

/// Delete a VM created by this build, unless it should stay registered.
///
/// A VM is kept only if `keep_registered` is set and the build neither
/// failed nor was cancelled.
async fn deregister(ctx: &BuildContext, vm_id: &VmId, keep_registered: bool) -> BuildResult<()> {
    if keep_registered && !ctx.build_failed() {
        ctx.ui
            .say("Keeping virtual machine registered with UTM host (keep_registered = true)");
        return Ok(());
    }

    ctx.ui.say("Deregistering and deleting VM...");
    tracing::info!(vm_id = %vm_id, "Deleting VM");
    ctx.driver
        .delete(vm_id)
        .await
        .map_err(|e| e.context("error deleting VM"))
}

/// Run the undo commands a step recorded, newest first.
///
/// Only commands still present in the context's records are run, so a drive
/// that was already detached is never detached twice. Every command is
/// attempted; the first failure is returned.
async fn detach_tracked(
    ctx: &mut BuildContext,
    undo: &mut Vec<(DiskCategory, ScriptCommand)>,
    operation: &str,
) -> BuildResult<()> {
    if undo.is_empty() {
        return Ok(());
    }
    if ctx.detached_isos {
        tracing::debug!("Devices already detached, skipping");
        undo.clear();
        return Ok(());
    }

    let mut first_error = None;
    for (category, command) in undo.drain(..).rev() {
        if ctx.disk_unmount_commands.get(category) != Some(&command) {
            continue;
        }
        match run_script(ctx, &command, operation).await {
            Ok(_) => {
                ctx.disk_unmount_commands.remove(category);
            }
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Failed to detach device");
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// First port in `[min, max]` that can be bound on `addr`.
///
/// The probe listener is closed before returning, so the port is free but
/// not reserved.
async fn find_available_port(addr: &str, min: u16, max: u16) -> BuildResult<u16> {
    for port in min..=max {
        if let Ok(listener) = TcpListener::bind((addr, port)).await {
            let port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
            drop(listener);
            return Ok(port);
        }
    }
    Err(BuildError::NotFound(format!(
        "no available port between {} and {} on {}",
        min, max, addr
    )))
}
