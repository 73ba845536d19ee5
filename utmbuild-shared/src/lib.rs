//! Types shared between the utmbuild library and its binary.

pub mod errors;

pub use errors::{BuildError, BuildResult};
