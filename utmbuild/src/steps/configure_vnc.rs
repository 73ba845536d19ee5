//! Step: expose the guest console over VNC through a QEMU argument.

use super::{find_available_port, run_script, vm_id};
use crate::config::VncConfig;
use crate::context::BuildContext;
use crate::driver::{ControlScript, ScriptCommand};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use rand::Rng;
use utmbuild_shared::errors::BuildResult;

const PASSWORD_LENGTH: usize = 8;
const PASSWORD_CHARSET: &[u8] = b"012345689abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// QEMU takes a display number, offset from the first VNC port.
const VNC_BASE_PORT: u16 = 5900;

/// Random VNC password.
fn vnc_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_CHARSET[rng.random_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

pub struct ConfigureVncStep {
    config: VncConfig,
}

impl ConfigureVncStep {
    pub fn new(config: VncConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for ConfigureVncStep {
    fn name(&self) -> &str {
        "configure_vnc"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        if !self.config.enabled {
            tracing::debug!("VNC disabled");
            return Ok(StepAction::Continue);
        }
        let vm_id = vm_id(ctx)?;
        let VncConfig {
            bind_address,
            port_min,
            port_max,
            use_password,
            ..
        } = &self.config;

        ctx.ui.say(&format!(
            "Looking for available port between {} and {} on {}",
            port_min, port_max, bind_address
        ));
        let port = find_available_port(bind_address, *port_min, *port_max)
            .await
            .map_err(|e| e.context("error finding VNC port"))?;
        tracing::info!(port, bind_address = %bind_address, "Found available VNC port");

        ctx.vnc_port = Some(port);
        ctx.vnc_password = use_password.then(vnc_password);

        let arg = format!(
            "-vnc {}:{}",
            bind_address,
            port.saturating_sub(VNC_BASE_PORT)
        );
        ctx.ui.say("Adding QEMU additional arguments...");
        let command = ScriptCommand::new(
            ControlScript::AddQemuAdditionalArgs,
            [vm_id.to_string(), "--args".into(), arg.clone()],
        );
        run_script(ctx, &command, "error adding QEMU additional arguments").await?;
        ctx.qemu_additional_arg = Some(arg);

        Ok(StepAction::Continue)
    }
}
