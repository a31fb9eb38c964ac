//! Builds Rust extension modules and executables as part of a Python package build.
//!
//! For every extension declared in `pyproject.toml` this decides which Rust
//! target matches the interpreter, runs cargo with the right flags, picks the
//! produced artifact out of cargo's JSON messages and installs it where the
//! packaging tool expects it.
//!
//! The CLI is a thin wrapper over [BuildOptions] and [BuildContext]; packaging
//! tool adapters use the functions in [hooks].

pub use crate::bridge::{Binding, PyLimitedApi, WheelLimitedApi};
pub use crate::build_context::{BuildContext, BuildContextBuilder};
pub use crate::build_options::{BuildOptions, ProjectOptions};
pub use crate::check::check_extensions;
pub use crate::clean::clean_extensions;
pub use crate::error::BuildError;
pub use crate::extension::{RustExtension, Strip};
pub use crate::host::{PackagingHost, SysconfigHost};
pub use crate::install::Installer;
pub use crate::metadata::MetadataCache;
pub use crate::pyproject_toml::PyProjectToml;
pub use crate::python_interpreter::PythonInterpreter;
pub use crate::target::{resolve_target, ResolvedTarget, TargetSpec, TargetTriple};
pub use crate::toolchain::{RustcInfo, Toolchain};
pub use crate::util::EnvVars;

mod bridge;
mod build_context;
mod build_options;
mod check;
mod clean;
pub mod compile;
mod error;
mod extension;
pub mod hooks;
mod host;
mod install;
mod metadata;
mod pyproject_toml;
mod python_interpreter;
pub mod target;
mod toolchain;
mod util;
