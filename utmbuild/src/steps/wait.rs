//! Step: give the guest time to boot and provision itself.

use crate::context::BuildContext;
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use utmbuild_shared::errors::BuildResult;

/// Cancellation is polled at this interval while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct BootWaitStep {
    duration: Duration,
}

impl BootWaitStep {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl BuildStep<BuildContext> for BootWaitStep {
    fn name(&self) -> &str {
        "boot_wait"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        if self.duration.is_zero() {
            return Ok(StepAction::Continue);
        }
        ctx.ui
            .say(&format!("Waiting {}s for boot...", self.duration.as_secs()));

        let deadline = Instant::now() + self.duration;
        loop {
            if ctx.cancel.is_cancelled() {
                // The runner sees the flag before the next step.
                tracing::info!("Boot wait interrupted by cancellation");
                return Ok(StepAction::Continue);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(StepAction::Continue);
            }
            tokio::time::sleep((deadline - now).min(POLL_INTERVAL)).await;
        }
    }
}
