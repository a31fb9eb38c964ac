//! The description of one Rust build unit: an extension module or a set of
//! executables produced by a single `Cargo.toml`.

use crate::bridge::{Binding, PyLimitedApi};
use crate::BuildError;
use anyhow::{Context, Result};
use fs_err as fs;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Launcher written next to an executable when `script = true`
const SCRIPT_TEMPLATE: &str = r#"
import os
import sys


def run():
    path = os.path.split(__file__)[0]
    file = os.path.join(path, {executable})
    if os.path.isfile(file):
        os.execv(file, sys.argv)
    else:
        raise RuntimeError("can't find " + file)
"#;

/// Which symbols to strip from the installed artifact in release builds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strip {
    /// Keep all symbols
    #[default]
    #[serde(alias = "no")]
    No,
    /// `strip -S`
    #[serde(alias = "debug")]
    Debug,
    /// `strip -x`
    #[serde(alias = "all")]
    All,
}

/// A Rust extension module or executable to build, immutable once constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RustExtension {
    /// Dotted python path of the module, or `key=value; ...` for multiple executables
    pub name: String,
    /// Native binary name to dotted destination path
    pub target: IndexMap<String, String>,
    /// Path to the `Cargo.toml`
    pub path: PathBuf,
    /// Extra arguments for cargo
    pub args: Vec<String>,
    /// Arguments that select the manifest, e.g. `--locked`, also passed to `cargo metadata`
    pub cargo_manifest_args: Vec<String>,
    /// Extra arguments passed to rustc after `--`
    pub rustc_flags: Vec<String>,
    /// Cargo features to enable
    pub features: Vec<String>,
    /// Minimum supported rustc version
    pub rust_version: Option<semver::VersionReq>,
    /// Don't echo cargo's output
    pub quiet: bool,
    /// `None` means debug for in-place builds and release otherwise
    pub debug: Option<bool>,
    pub binding: Binding,
    pub strip: Strip,
    /// Generate a console script launcher for executables
    pub script: bool,
    /// Build with `-Ctarget-cpu=native`
    pub native: bool,
    /// A failing build only emits a warning
    pub optional: bool,
    pub py_limited_api: PyLimitedApi,
    /// Extra environment variables for cargo
    pub env: IndexMap<String, String>,
    /// Install executables into the wheel's `.data/scripts` directory
    pub bin: bool,
}

impl RustExtension {
    /// An extension module built from `Cargo.toml` in the current directory
    pub fn new(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            name: target.clone(),
            target: IndexMap::from([(String::new(), target)]),
            path: PathBuf::from("Cargo.toml"),
            args: Vec::new(),
            cargo_manifest_args: Vec::new(),
            rustc_flags: Vec::new(),
            features: Vec::new(),
            rust_version: None,
            quiet: false,
            debug: None,
            binding: Binding::PyO3,
            strip: Strip::No,
            script: false,
            native: false,
            optional: false,
            py_limited_api: PyLimitedApi::Auto,
            env: IndexMap::new(),
            bin: false,
        }
    }

    /// One build unit producing several executables, keyed by binary name
    pub fn with_targets(targets: IndexMap<String, String>) -> Self {
        let name = targets
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join("; ");
        Self {
            name,
            target: targets,
            binding: Binding::Exec,
            ..Self::new(String::new())
        }
    }

    /// An executable installed into the wheel's scripts directory
    pub fn bin(target: impl Into<String>) -> Self {
        Self {
            binding: Binding::Exec,
            bin: true,
            ..Self::new(target)
        }
    }

    /// The profile passed as `--profile <name>` or `--profile=<name>` in `args`, if any
    pub fn cargo_profile(&self) -> Result<Option<&str>> {
        if let Some(index) = self.args.iter().position(|arg| arg == "--profile") {
            return match self.args.get(index + 1) {
                Some(profile) => Ok(Some(profile.as_str())),
                None => Err(self.invalid_profile()),
            };
        }
        match self
            .args
            .iter()
            .find_map(|arg| arg.strip_prefix("--profile="))
        {
            Some("") => Err(self.invalid_profile()),
            profile => Ok(profile),
        }
    }

    fn invalid_profile(&self) -> anyhow::Error {
        BuildError::InvalidConfig(format!(
            "Can not parse cargo profile from {:?}",
            self.args
        ))
        .into()
    }

    /// Whether cargo builds executables for this extension
    pub fn uses_exec(&self) -> bool {
        self.binding.uses_exec()
    }

    /// Whether `rust-version` holds for the given compiler
    pub fn check_rust_version(&self, version: &semver::Version) -> Result<()> {
        match &self.rust_version {
            Some(required) if !required.matches(version) => Err(BuildError::VersionMismatch {
                found: version.clone(),
                required: required.clone(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Console script entry points, `name=pkg._gen_name:run`, for executables with `script = true`
    pub fn entry_points(&self) -> Result<Vec<String>> {
        if !(self.script && self.uses_exec()) {
            return Ok(Vec::new());
        }
        self.target
            .values()
            .map(|module| {
                let (package, name) = module.rsplit_once('.').ok_or_else(|| {
                    BuildError::InvalidConfig(format!(
                        "script target `{module}` must live inside a python package"
                    ))
                })?;
                Ok(format!("{name}={package}._gen_{name}:run"))
            })
            .collect()
    }

    /// Writes `_gen_<module_name>.py` next to `exe_path`
    pub fn install_script(&self, module_name: &str, exe_path: &Path) -> Result<()> {
        if !(self.script && self.uses_exec()) {
            return Ok(());
        }
        let executable = exe_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", exe_path.display()))?;
        let script = exe_path.with_file_name(format!("_gen_{module_name}.py"));
        fs::write(
            &script,
            SCRIPT_TEMPLATE.replace("{executable}", &format!("{executable:?}")),
        )?;
        Ok(())
    }
}

impl fmt::Display for RustExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
