//! Step trait for pipeline execution.

use async_trait::async_trait;
use utmbuild_shared::errors::BuildResult;

/// Whether the pipeline should move on after a step's `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// A unit of work in a build pipeline.
///
/// `run` is invoked at most once. `cleanup` is invoked exactly once for every
/// step whose `run` was invoked, whatever it returned, so it must cope with a
/// partially completed `run`.
#[async_trait]
pub trait BuildStep<Ctx: Send + Sync>: Send + Sync {
    /// Human-readable step name for logging.
    fn name(&self) -> &str;

    /// Do the work. An `Err` is recorded as the build error and halts.
    async fn run(&mut self, ctx: &mut Ctx) -> BuildResult<StepAction>;

    /// Release whatever `run` acquired. Errors are logged, never escalated.
    async fn cleanup(&mut self, _ctx: &mut Ctx) -> BuildResult<()> {
        Ok(())
    }
}

pub type BoxedStep<Ctx> = Box<dyn BuildStep<Ctx>>;
