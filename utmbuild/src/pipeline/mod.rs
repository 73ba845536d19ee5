//! Linear build pipeline with reverse-order cleanup.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Steps
//!
//! run:      step[0].run → step[1].run → ... → step[k].run   (halt / cancel / done)
//! cleanup:  step[k].cleanup → ... → step[1].cleanup → step[0].cleanup
//! ```
//!
//! - Step: unit of work with paired `run` / `cleanup`
//! - Pipeline: runs steps strictly in order against one context, then sweeps
//!   cleanup over every step whose `run` was invoked, last first
//!
//! The step order is fixed when the pipeline is built. Nothing is reordered,
//! skipped or retried; a halt or cancellation only cuts the sequence short.

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod step;

pub use metrics::{PipelineMetrics, StepMetrics};
pub use pipeline::{Pipeline, PipelineContext, PipelineReport, PipelineState};
pub use step::{BoxedStep, BuildStep, StepAction};
