//! The `[tool.pyext-build]` section of `pyproject.toml`.

use crate::bridge::{Binding, PyLimitedApi};
use crate::extension::Strip;
use crate::{BuildError, RustExtension};
use anyhow::{Context, Result};
use fs_err as fs;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// The parts of `pyproject.toml` we read
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PyProjectToml {
    /// `[project]`
    pub project: Option<Project>,
    /// `[tool]`
    pub tool: Option<Tool>,
}

/// PEP 621 `[project]` metadata
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub version: Option<String>,
}

/// `[tool]`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Tool {
    #[serde(rename = "pyext-build")]
    pub pyext_build: Option<ToolPyextBuild>,
}

/// `[tool.pyext-build]`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ToolPyextBuild {
    /// Extension modules, `[[tool.pyext-build.ext-modules]]`
    #[serde(default)]
    pub ext_modules: Vec<ExtensionConfig>,
    /// Executables installed as scripts, `[[tool.pyext-build.bins]]`
    #[serde(default)]
    pub bins: Vec<ExtensionConfig>,
}

/// Either `target = "pkg.module"` or `target = { binary = "pkg.module", ... }`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TargetConfig {
    Single(String),
    Multiple(IndexMap<String, String>),
}

/// One `[[tool.pyext-build.ext-modules]]` or `[[tool.pyext-build.bins]]` entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExtensionConfig {
    pub target: TargetConfig,
    /// Relative to the directory of `pyproject.toml`
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cargo_manifest_args: Vec<String>,
    #[serde(default)]
    pub rustc_flags: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    pub rust_version: Option<String>,
    #[serde(default)]
    pub quiet: bool,
    pub debug: Option<bool>,
    pub binding: Option<Binding>,
    #[serde(default)]
    pub strip: Strip,
    #[serde(default)]
    pub script: bool,
    #[serde(default)]
    pub native: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub py_limited_api: PyLimitedApi,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl ExtensionConfig {
    fn into_extension(self, project_root: &Path, bin: bool) -> Result<RustExtension> {
        let mut ext = match self.target {
            TargetConfig::Single(target) if bin => RustExtension::bin(target),
            TargetConfig::Single(target) => RustExtension::new(target),
            TargetConfig::Multiple(targets) => RustExtension::with_targets(targets),
        };
        let binding = match (self.binding, bin) {
            (Some(binding), true) if binding != Binding::Exec => {
                return Err(BuildError::InvalidConfig(format!(
                    "bins entry `{}` must use the Exec binding, not {binding}",
                    ext.name
                ))
                .into())
            }
            (_, true) => Binding::Exec,
            (Some(binding), false) => binding,
            (None, false) => ext.binding,
        };
        let rust_version = self
            .rust_version
            .map(|version| {
                semver::VersionReq::parse(&version).map_err(|err| {
                    BuildError::InvalidConfig(format!(
                        "Can not parse rust compiler version `{version}` of {}: {err}",
                        ext.name
                    ))
                })
            })
            .transpose()?;

        ext.path = project_root.join(self.path.unwrap_or_else(|| PathBuf::from("Cargo.toml")));
        ext.args = self.args;
        ext.cargo_manifest_args = self.cargo_manifest_args;
        ext.rustc_flags = self.rustc_flags;
        ext.features = self.features;
        ext.rust_version = rust_version;
        ext.quiet = self.quiet;
        ext.debug = self.debug;
        ext.binding = binding;
        ext.strip = self.strip;
        ext.script = self.script;
        ext.native = self.native;
        ext.optional = self.optional;
        ext.py_limited_api = self.py_limited_api;
        ext.env = self.env;
        ext.bin = bin;
        Ok(ext)
    }
}

impl PyProjectToml {
    /// Read and parse `pyproject.toml`
    pub fn new(pyproject_file: impl AsRef<Path>) -> Result<Self> {
        let path = pyproject_file.as_ref();
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// All declared extensions, modules first, with manifest paths resolved against `project_root`
    pub fn extensions(&self, project_root: &Path) -> Result<Vec<RustExtension>> {
        let Some(tool) = self.tool.as_ref().and_then(|tool| tool.pyext_build.as_ref()) else {
            return Ok(Vec::new());
        };
        let modules = tool
            .ext_modules
            .iter()
            .map(|config| config.clone().into_extension(project_root, false));
        let bins = tool
            .bins
            .iter()
            .map(|config| config.clone().into_extension(project_root, true));
        modules.chain(bins).collect()
    }

    /// `<name>-<version>[-<build number>].data`, the wheel's data directory
    pub fn data_dir(&self, build_number: Option<&str>) -> Result<String> {
        let (name, version) = match &self.project {
            Some(project) => (
                project.name.as_str(),
                project.version.as_deref().unwrap_or("0.0.0"),
            ),
            None => ("UNKNOWN", "0.0.0"),
        };
        let mut components = vec![
            safe_component(name).replace('-', "_"),
            safe_component(&version.replace(' ', ".")).replace('-', "_"),
        ];
        if let Some(build_number) = build_number.filter(|build| !build.is_empty()) {
            if !build_number.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(BuildError::InvalidConfig(format!(
                    "Build number `{build_number}` must start with a digit"
                ))
                .into());
            }
            components.push(build_number.to_string());
        }
        Ok(format!("{}.data", components.join("-")))
    }
}

/// The directory `pyproject.toml` lives in, which manifest paths are relative to
pub fn project_root(pyproject_path: &Path) -> PathBuf {
    match pyproject_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

fn unsafe_chars() -> &'static Regex {
    UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9.]+").expect("invalid regex pattern"))
}

/// Runs of anything but alphanumerics and `.` become a single `-`
fn safe_component(value: &str) -> String {
    unsafe_chars().replace_all(value, "-").into_owned()
}
