use crate::pipeline::StepAction;

#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub index: usize,
    pub name: String,
    pub duration_ms: u128,
    /// `None` when `run` returned an error.
    pub action: Option<StepAction>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub cleanup_duration_ms: u128,
    pub steps: Vec<StepMetrics>,
}

impl PipelineMetrics {
    /// Names of the steps whose `run` was invoked, in order.
    pub fn steps_run(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }
}
