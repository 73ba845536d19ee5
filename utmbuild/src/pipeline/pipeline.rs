//! Sequential pipeline executor.

use super::metrics::{PipelineMetrics, StepMetrics};
use super::step::{BoxedStep, StepAction};
use std::time::Instant;
use utmbuild_shared::errors::BuildError;

/// What the runner needs from a context besides handing it to steps.
pub trait PipelineContext: Send + Sync {
    /// External cancellation, honoured between steps.
    fn is_cancelled(&self) -> bool;

    /// Halt signal, checked after every step.
    fn is_halted(&self) -> bool;

    fn halt(&mut self);

    /// Record a step failure. Only the first one is kept.
    fn record_error(&mut self, error: BuildError);

    /// Show a failure to the operator.
    fn report(&self, message: &str);

    /// Show a non-fatal problem to the operator.
    fn warn(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running(usize),
    Halted,
    Cancelled,
    Completed,
}

impl PipelineState {
    pub fn is_success(self) -> bool {
        self == PipelineState::Completed
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub state: PipelineState,
    pub metrics: PipelineMetrics,
}

pub struct Pipeline<Ctx: PipelineContext> {
    steps: Vec<BoxedStep<Ctx>>,
}

impl<Ctx> Pipeline<Ctx>
where
    Ctx: PipelineContext,
{
    pub fn new(steps: Vec<BoxedStep<Ctx>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, then clean up in reverse.
    ///
    /// Consumes the pipeline so no step runs twice. Always completes the
    /// cleanup sweep before returning.
    pub async fn run(mut self, ctx: &mut Ctx) -> PipelineReport {
        let total_start = Instant::now();
        let mut state = PipelineState::Pending;
        let mut furthest: Option<usize> = None;
        let mut step_metrics = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter_mut().enumerate() {
            if ctx.is_cancelled() {
                tracing::warn!(step = %step.name(), "Build cancelled, not starting step");
                state = PipelineState::Cancelled;
                break;
            }

            state = PipelineState::Running(index);
            furthest = Some(index);
            let name = step.name().to_string();
            tracing::debug!(step = %name, index, "Running step");

            let step_start = Instant::now();
            let action = match step.run(ctx).await {
                Ok(action) => Some(action),
                Err(e) => {
                    tracing::error!(step = %name, error = %e, "Step failed");
                    ctx.report(&e.to_string());
                    ctx.record_error(e);
                    ctx.halt();
                    None
                }
            };
            let duration_ms = step_start.elapsed().as_millis();
            tracing::debug!(step = %name, duration_ms, "Step finished");

            step_metrics.push(StepMetrics {
                index,
                name,
                duration_ms,
                action,
            });

            if action == Some(StepAction::Halt) {
                ctx.halt();
            }
            if ctx.is_halted() {
                tracing::info!(step = %step.name(), "Pipeline halted");
                state = PipelineState::Halted;
                break;
            }
        }

        if matches!(state, PipelineState::Pending | PipelineState::Running(_)) {
            // A cancel raised during the last step still counts.
            state = if ctx.is_cancelled() {
                tracing::warn!("Build cancelled during the last step");
                PipelineState::Cancelled
            } else {
                PipelineState::Completed
            };
        }

        let cleanup_start = Instant::now();
        if let Some(last) = furthest {
            for step in self.steps[..=last].iter_mut().rev() {
                if let Err(e) = step.cleanup(ctx).await {
                    tracing::warn!(step = %step.name(), error = %e, "Cleanup failed");
                    ctx.warn(&format!("Cleanup of {} failed: {}", step.name(), e));
                }
            }
        }

        PipelineReport {
            state,
            metrics: PipelineMetrics {
                total_duration_ms: total_start.elapsed().as_millis(),
                cleanup_duration_ms: cleanup_start.elapsed().as_millis(),
                steps: step_metrics,
            },
        }
    }
}
