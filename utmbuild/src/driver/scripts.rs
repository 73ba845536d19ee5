//! Bundled control-script registry.
//!
//! Scripts are compiled into the binary and fed to the interpreter on stdin,
//! so there is never a script file on disk to go missing or be tampered with.

use std::fmt;
use utmbuild_shared::errors::{BuildError, BuildResult};

macro_rules! control_scripts {
    ($($variant:ident => $file:literal),* $(,)?) => {
        /// A script in the bundled registry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ControlScript {
            $($variant,)*
        }

        impl ControlScript {
            pub const ALL: &'static [ControlScript] = &[$(ControlScript::$variant,)*];

            /// Registry file name, e.g. `attach_iso.applescript`.
            pub fn file_name(self) -> &'static str {
                match self {
                    $(ControlScript::$variant => concat!($file, ".applescript"),)*
                }
            }

            /// Script source fed to the interpreter.
            pub fn body(self) -> &'static str {
                match self {
                    $(ControlScript::$variant => include_str!(concat!("../../scripts/", $file, ".applescript")),)*
                }
            }
        }
    };
}

control_scripts! {
    CreateVm => "create_vm",
    CreateVmFromSource => "create_vm_from_source",
    CustomizeVm => "customize_vm",
    AddDrive => "add_drive",
    AttachIso => "attach_iso",
    RemoveDrive => "remove_drive",
    RemoveFirstDrive => "remove_first_drive",
    AddQemuDisplay => "add_qemu_display",
    RemoveQemuDisplayByName => "remove_qemu_display_by_name",
    AddQemuAdditionalArgs => "add_qemu_additional_args",
    RemoveQemuAdditionalArgs => "remove_qemu_additional_args",
    AddPortForwards => "add_port_forwards",
    ClearPortForwards => "clear_port_forwards",
}

impl ControlScript {
    /// Look up a script by registry name, with or without the extension.
    pub fn from_name(name: &str) -> BuildResult<Self> {
        let stem = name.strip_suffix(".applescript").unwrap_or(name);
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.file_name().strip_suffix(".applescript") == Some(stem))
            .ok_or_else(|| BuildError::NotFound(format!("control script {}", name)))
    }
}

impl fmt::Display for ControlScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// A script plus its flag-style arguments.
///
/// Also serves as an undo record: attach steps store the exact command that
/// reverses what they did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub script: ControlScript,
    pub args: Vec<String>,
}

impl ScriptCommand {
    pub fn new<I, S>(script: ControlScript, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `[script-name, args...]`.
    ///
    /// An empty command is a programmer error and is rejected before anything
    /// is executed.
    pub fn parse<S: AsRef<str>>(argv: &[S]) -> BuildResult<Self> {
        let (name, rest) = argv
            .split_first()
            .ok_or_else(|| BuildError::InvalidArgument("no control script provided".into()))?;
        let script = ControlScript::from_name(name.as_ref())?;
        Ok(Self::new(script, rest.iter().map(|a| a.as_ref().to_string())))
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

impl fmt::Display for ScriptCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.script)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
