//! Operator-facing message sink.

/// Where steps report progress to the operator.
///
/// `say` announces a step and `message` adds detail under it. `warn` is for
/// problems the build survives, such as a failed cleanup.
pub trait Ui: Send + Sync {
    fn say(&self, message: &str);
    fn message(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Routes operator messages into the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        tracing::info!(target: "utmbuild::ui", "==> {}", message);
    }

    fn message(&self, message: &str) {
        tracing::info!(target: "utmbuild::ui", "    {}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "utmbuild::ui", "==> {}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "utmbuild::ui", "==> {}", message);
    }
}
