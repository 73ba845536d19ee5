//! Test doubles for the process and operator seams.

use crate::driver::{ControlScript, Driver, DriverKind};
use crate::executor::{CommandOutput, CommandRunner, Invocation};
use crate::ui::Ui;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use utmbuild_shared::errors::BuildResult;

/// Records invocations and replays scripted outputs.
///
/// Responses are keyed by script tag (bundled script file name or inline tag
/// such as `utm_version`), falling back to the first argument, which is the
/// subcommand for `utmctl`. Queued responses are consumed in order; the last
/// one repeats. Unscripted calls succeed with empty output.
#[derive(Default)]
pub(crate) struct MockRunner {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(invocation: &Invocation) -> String {
        invocation
            .script
            .map(str::to_string)
            .or_else(|| invocation.args.first().cloned())
            .unwrap_or_default()
    }

    /// Replace queued responses for `key` with a single response.
    pub fn respond(&self, key: &str, output: CommandOutput) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(key.to_string(), VecDeque::from([output]));
    }

    /// Append a response for `key` after the ones already queued.
    pub fn queue(&self, key: &str, output: CommandOutput) {
        let mut responses = self.responses.lock().unwrap();
        responses.entry(key.to_string()).or_default().push_back(output);
    }

    pub fn respond_utmctl(&self, subcommand: &str, output: CommandOutput) {
        self.respond(subcommand, output);
    }

    pub fn respond_script(&self, script: ControlScript, output: CommandOutput) {
        self.respond(script.file_name(), output);
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|inv| Self::key(inv) == key)
            .collect()
    }

    pub fn script_calls(&self, script: ControlScript) -> Vec<Invocation> {
        self.calls_for(script.file_name())
    }

    /// `utmctl` calls only, so a script whose first argument happens to equal
    /// a subcommand is never counted.
    pub fn utmctl_calls(&self, subcommand: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|inv| inv.script.is_none() && inv.program_name() == "utmctl")
            .filter(|inv| inv.args.first().map(String::as_str) == Some(subcommand))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, invocation: &Invocation) -> BuildResult<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        let mut responses = self.responses.lock().unwrap();
        let output = match responses.get_mut(&Self::key(invocation)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::success(""),
        };
        Ok(output)
    }
}

/// Operator messages captured by kind.
#[derive(Default)]
pub(crate) struct RecordingUi {
    pub says: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn said(&self, needle: &str) -> bool {
        self.says.lock().unwrap().iter().any(|m| m.contains(needle))
    }

    pub fn errored(&self, needle: &str) -> bool {
        self.errors.lock().unwrap().iter().any(|m| m.contains(needle))
    }

    pub fn warned(&self, needle: &str) -> bool {
        self.warnings.lock().unwrap().iter().any(|m| m.contains(needle))
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.says.lock().unwrap().push(message.to_string());
    }

    fn message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

pub(crate) const TEST_VM_ID: &str = "A1B2C3D4-0000-4000-8000-123456789ABC";

/// Runner, UI and driver wired together for step tests.
pub(crate) struct Harness {
    pub runner: Arc<MockRunner>,
    pub ui: Arc<RecordingUi>,
    pub driver: Arc<Driver>,
}

impl Harness {
    pub fn new(kind: DriverKind) -> Self {
        let runner = Arc::new(MockRunner::new());
        let driver = Arc::new(Driver::new(kind, "/usr/local/bin/utmctl", runner.clone()));
        Self {
            runner,
            ui: Arc::new(RecordingUi::new()),
            driver,
        }
    }

    /// Fresh context with no VM.
    pub fn context(&self) -> crate::context::BuildContext {
        crate::context::BuildContext::new(self.driver.clone(), self.ui.clone())
    }

    /// Fresh context that already owns [`TEST_VM_ID`].
    pub fn context_with_vm(&self) -> crate::context::BuildContext {
        let mut ctx = self.context();
        ctx.assign_vm_id(crate::driver::VmId::new(TEST_VM_ID))
            .unwrap();
        ctx.vm_name = Some("packer-test".into());
        ctx
    }
}
