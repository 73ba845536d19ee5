//! utmbuild: builds UTM virtual machine images.
//!
//! A build is a fixed sequence of steps run by [`pipeline::Pipeline`] against
//! one [`context::BuildContext`]. Every step talks to UTM through
//! [`driver::Driver`], which picks the dialect of the installed UTM release
//! and shells out through an [`executor::CommandRunner`].
//!
//! ```ignore
//! let driver = Arc::new(Driver::detect(Arc::new(SystemRunner::new())).await?);
//! let artifact = Builder::new(config, driver, Arc::new(TracingUi))?.run().await?;
//! ```

pub mod build;
pub mod config;
pub mod context;
pub mod driver;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod steps;
pub mod ui;

#[cfg(test)]
mod testing;

pub use build::{BuildArtifact, Builder};
pub use config::{BuildConfig, BuildKind};
pub use driver::{Driver, DriverKind};
pub use utmbuild_shared::errors::{BuildError, BuildResult};
