//! Per-build execution context shared by every step.
//!
//! Each field has exactly one writing step; later steps only read it. The
//! fields mirror what flows between steps:
//!
//! ```text
//! create_vm / import   → vm_id, vm_name
//! guest_additions      → guest_additions_path
//! attach_iso, seed     → disk_unmount_commands[category]
//! configure_vnc        → qemu_additional_arg, vnc_port, vnc_password
//! port_forward         → comm_host_port
//! run                  → instance_id
//! remove_devices       → detached_isos
//! export               → export_path
//! ```

use crate::driver::{Driver, ScriptCommand, VmId};
use crate::pipeline::PipelineContext;
use crate::ui::Ui;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Category of a removable drive whose undo command is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiskCategory {
    BootIso,
    CdFiles,
    GuestAdditions,
    CloudSeed,
}

impl DiskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DiskCategory::BootIso => "boot_iso",
            DiskCategory::CdFiles => "cd_files",
            DiskCategory::GuestAdditions => "guest_additions",
            DiskCategory::CloudSeed => "cloud_seed",
        }
    }
}

impl fmt::Display for DiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undo commands for attached drives, one per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoRecords {
    records: BTreeMap<DiskCategory, ScriptCommand>,
}

impl UndoRecords {
    /// Store the command that detaches `category`. A category is attached at
    /// most once per build.
    pub fn record(&mut self, category: DiskCategory, undo: ScriptCommand) -> BuildResult<()> {
        if self.records.contains_key(&category) {
            return Err(BuildError::InvalidState(format!(
                "{} is already attached",
                category
            )));
        }
        self.records.insert(category, undo);
        Ok(())
    }

    pub fn get(&self, category: DiskCategory) -> Option<&ScriptCommand> {
        self.records.get(&category)
    }

    pub fn remove(&mut self, category: DiskCategory) -> Option<ScriptCommand> {
        self.records.remove(&category)
    }

    pub fn contains(&self, category: DiskCategory) -> bool {
        self.records.contains_key(&category)
    }

    pub fn categories(&self) -> Vec<DiskCategory> {
        self.records.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Cancellation signal, set from outside the pipeline (e.g. Ctrl-C).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BuildContext {
    pub driver: Arc<Driver>,
    pub ui: Arc<dyn Ui>,
    pub cancel: CancelFlag,

    vm_id: Option<VmId>,
    pub vm_name: Option<String>,

    pub iso_path: Option<PathBuf>,
    pub cd_path: Option<PathBuf>,
    pub http_port: Option<u16>,
    pub guest_additions_path: Option<PathBuf>,

    pub comm_host_port: Option<u16>,
    pub qemu_additional_arg: Option<String>,
    pub vnc_port: Option<u16>,
    pub vnc_password: Option<String>,

    pub disk_unmount_commands: UndoRecords,
    /// Set once every tracked drive has been detached in bulk.
    pub detached_isos: bool,

    pub export_path: Option<PathBuf>,
    pub instance_id: Option<String>,

    halted: bool,
    error: Option<BuildError>,
}

impl BuildContext {
    pub fn new(driver: Arc<Driver>, ui: Arc<dyn Ui>) -> Self {
        Self {
            driver,
            ui,
            cancel: CancelFlag::new(),
            vm_id: None,
            vm_name: None,
            iso_path: None,
            cd_path: None,
            http_port: None,
            guest_additions_path: None,
            comm_host_port: None,
            qemu_additional_arg: None,
            vnc_port: None,
            vnc_password: None,
            disk_unmount_commands: UndoRecords::default(),
            detached_isos: false,
            export_path: None,
            instance_id: None,
            halted: false,
            error: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn vm_id(&self) -> Option<&VmId> {
        self.vm_id.as_ref()
    }

    /// VM identity for steps that cannot run without one.
    pub fn require_vm_id(&self) -> BuildResult<&VmId> {
        self.vm_id
            .as_ref()
            .ok_or_else(|| BuildError::InvalidState("VM id read before it was assigned".into()))
    }

    /// Assign the VM identity. It never changes afterwards.
    pub fn assign_vm_id(&mut self, id: VmId) -> BuildResult<()> {
        if let Some(existing) = &self.vm_id {
            return Err(BuildError::InvalidState(format!(
                "VM id already assigned: {}",
                existing
            )));
        }
        self.vm_id = Some(id);
        Ok(())
    }

    /// First error recorded by a step, if any.
    pub fn error(&self) -> Option<&BuildError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<BuildError> {
        self.error.take()
    }

    /// The build stopped short: a step halted, failed, or it was cancelled.
    pub fn build_failed(&self) -> bool {
        self.halted || self.error.is_some() || self.cancel.is_cancelled()
    }
}

impl PipelineContext for BuildContext {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn halt(&mut self) {
        self.halted = true;
    }

    fn record_error(&mut self, error: BuildError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn report(&self, message: &str) {
        self.ui.error(message);
    }

    fn warn(&self, message: &str) {
        self.ui.warn(message);
    }
}
