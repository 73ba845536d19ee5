//! Build orchestration.
//!
//! ## Architecture
//!
//! ```text
//! Builder::new(config)          sanitize, surface warnings
//!   └─ run()
//!        ├─ execution_plan(kind)   fixed step list (see plan.rs)
//!        ├─ BuildContext           seeded with input paths
//!        └─ Pipeline::run          steps in order, cleanup in reverse
//! ```
//!
//! The pipeline always finishes its cleanup sweep before `run` returns, so
//! an error from `run` means the VM (unless kept) has already been removed.

mod plan;

pub use plan::execution_plan;

use crate::config::BuildConfig;
use crate::context::{BuildContext, CancelFlag};
use crate::driver::{Driver, VmId};
use crate::pipeline::{Pipeline, PipelineMetrics, PipelineState};
use crate::ui::Ui;
use std::path::PathBuf;
use std::sync::Arc;
use utmbuild_shared::errors::{BuildError, BuildResult};

/// What a finished build produced.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub vm_id: VmId,
    pub vm_name: String,
    /// Unset when export was skipped.
    pub export_path: Option<PathBuf>,
    pub metrics: PipelineMetrics,
}

pub struct Builder {
    config: BuildConfig,
    driver: Arc<Driver>,
    ui: Arc<dyn Ui>,
    cancel: CancelFlag,
}

impl Builder {
    /// Validate `config` and prepare a builder for it.
    pub fn new(mut config: BuildConfig, driver: Arc<Driver>, ui: Arc<dyn Ui>) -> BuildResult<Self> {
        for warning in config.sanitize()? {
            ui.warn(&warning);
        }
        Ok(Self {
            config,
            driver,
            ui,
            cancel: CancelFlag::new(),
        })
    }

    /// Share a cancellation flag with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the build to completion, halt or cancellation.
    pub async fn run(self) -> BuildResult<BuildArtifact> {
        let Builder {
            config,
            driver,
            ui,
            cancel,
        } = self;

        let steps = execution_plan(&config)?;
        let pipeline = Pipeline::new(steps);
        tracing::info!(
            kind = config.kind.as_str(),
            driver = %driver.kind(),
            vm_name = %config.vm_name,
            steps = ?pipeline.step_names(),
            "Starting build"
        );

        let mut ctx = BuildContext::new(driver, ui).with_cancel(cancel);
        ctx.iso_path = config.iso_path.clone();
        ctx.cd_path = config.cd_path.clone();
        ctx.http_port = config.http_port;

        let report = pipeline.run(&mut ctx).await;
        tracing::info!(
            state = ?report.state,
            total_ms = report.metrics.total_duration_ms,
            cleanup_ms = report.metrics.cleanup_duration_ms,
            "Build finished"
        );

        match report.state {
            PipelineState::Completed => {
                let vm_id = ctx.require_vm_id()?.clone();
                let vm_name = ctx.vm_name.clone().unwrap_or_else(|| config.vm_name.clone());
                Ok(BuildArtifact {
                    vm_id,
                    vm_name,
                    export_path: ctx.export_path.take(),
                    metrics: report.metrics,
                })
            }
            PipelineState::Cancelled => Err(BuildError::Cancelled),
            PipelineState::Halted => {
                let step = report
                    .metrics
                    .steps
                    .last()
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                Err(ctx.take_error().unwrap_or(BuildError::Halted(step)))
            }
            state => Err(BuildError::Internal(format!(
                "pipeline returned in unexpected state {:?}",
                state
            ))),
        }
    }
}
