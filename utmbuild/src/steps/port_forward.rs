//! Step: forward a host port to the guest's communicator port.

use super::{find_available_port, run_script, vm_id};
use crate::config::CommConfig;
use crate::context::BuildContext;
use crate::driver::{ControlScript, ScriptCommand};
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

const LOOPBACK: &str = "127.0.0.1";
/// Network interface the forward is added to; index 0 is the shared network.
const NETWORK_INDEX: &str = "1";

pub struct PortForwardStep {
    config: CommConfig,
}

impl PortForwardStep {
    pub fn new(config: CommConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for PortForwardStep {
    fn name(&self) -> &str {
        "port_forward"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        if self.config.communicator == "none" {
            tracing::debug!("No communicator, skipping port forward");
            return Ok(StepAction::Continue);
        }
        let vm_id = vm_id(ctx)?;

        ctx.ui.say(&format!(
            "Looking for available communicator (SSH, WinRM, etc) port between {} and {}",
            self.config.host_port_min, self.config.host_port_max
        ));
        let host_port = find_available_port(LOOPBACK, self.config.host_port_min, self.config.host_port_max)
            .await
            .map_err(|e| e.context("error finding communicator port"))?;

        ctx.ui.message(&format!(
            "Creating forwarded port mapping for communicator (SSH, WinRM, etc) (host port {})",
            host_port
        ));
        let rule = format!("TcPp,,{},{},{}", self.config.guest_port, LOOPBACK, host_port);
        let command = ScriptCommand::new(
            ControlScript::AddPortForwards,
            [vm_id.to_string(), "--index".into(), NETWORK_INDEX.into(), rule],
        );
        run_script(ctx, &command, "error creating port forwarding rule").await?;

        ctx.comm_host_port = Some(host_port);
        tracing::info!(vm_id = %vm_id, host_port, guest_port = self.config.guest_port, "Port forward added");
        Ok(StepAction::Continue)
    }
}
