use crate::build_options::BuildOptions;
use crate::host::SysconfigHost;
use crate::metadata::MetadataCache;
use crate::pyproject_toml::{project_root, PyProjectToml};
use crate::python_interpreter::PythonInterpreter;
use crate::target::CrossSignals;
use crate::toolchain::RustcInfo;
use crate::BuildContext;
use anyhow::{anyhow, Context, Result};
use platform_info::{PlatformInfo, PlatformInfoAPI, UNameAPI};
use std::env;
use tracing::{debug, instrument};

/// Builder for constructing a [`BuildContext`] from [`BuildOptions`].
///
/// Created via [`BuildOptions::into_build_context()`], then configured
/// with chained setter methods before calling [`build()`](Self::build).
#[derive(Debug)]
pub struct BuildContextBuilder {
    build_options: BuildOptions,
    inplace: Option<bool>,
    plat_name: Option<String>,
}

impl BuildContextBuilder {
    pub(crate) fn new(build_options: BuildOptions) -> Self {
        Self {
            build_options,
            inplace: None,
            plat_name: None,
        }
    }

    /// Overrides `--inplace`, as the packaging tool's `build_ext` does
    pub fn inplace(mut self, inplace: bool) -> Self {
        self.inplace = Some(inplace);
        self
    }

    /// Overrides `--plat-name`
    pub fn plat_name(mut self, plat_name: Option<String>) -> Self {
        if plat_name.is_some() {
            self.plat_name = plat_name;
        }
        self
    }

    #[instrument(skip_all)]
    pub fn build(self) -> Result<BuildContext> {
        let Self {
            build_options,
            inplace,
            plat_name,
        } = self;

        let pyproject_path = &build_options.project.pyproject;
        let pyproject = PyProjectToml::new(pyproject_path)?;
        let project_root = project_root(pyproject_path);
        let extensions = pyproject.extensions(&project_root)?;
        debug!(count = extensions.len(), "Found rust extensions");

        let executable = build_options
            .python
            .clone()
            .unwrap_or_else(PythonInterpreter::default_executable);
        let interpreter = PythonInterpreter::check_executable(&executable)
            .with_context(|| format!("Failed to query {}", executable.display()))?;
        debug!(%interpreter, "Building for python");
        let metadata = &interpreter.metadata;

        let machine = if metadata.machine.is_empty() {
            running_machine()?
        } else {
            metadata.machine.clone()
        };
        let signals = CrossSignals::from_env(machine, metadata.build_config());

        let ext_suffix = metadata
            .ext_suffix
            .clone()
            .ok_or_else(|| anyhow!("{interpreter} does not report an extension suffix"))?;
        let host = SysconfigHost {
            plat_name: plat_name
                .or(build_options.plat_name)
                .unwrap_or_else(|| metadata.platform.clone()),
            host_platform: metadata.platform.clone(),
            inplace: inplace.unwrap_or(build_options.inplace),
            debug: build_options.debug.then_some(true),
            release: build_options.release,
            ext_suffix,
            abi3_suffix: metadata.abi3_suffix.clone(),
            exe_suffix: metadata.exe.clone().unwrap_or_default(),
            build_lib: build_options.build_lib,
            project_root,
            data_dir: pyproject.data_dir(build_options.build_number.as_deref())?,
            py_limited_api: build_options.py_limited_api.unwrap_or_default(),
        };

        Ok(BuildContext {
            extensions,
            host: Box::new(host),
            target: build_options.target,
            signals,
            qbuild: build_options.qbuild,
            verbose: build_options.verbose,
            cargo: env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()),
            base_env: interpreter.build_env()?,
            rustflags: env::var("RUSTFLAGS").ok(),
            toolchain: Box::new(RustcInfo::default()),
            metadata: MetadataCache::new(),
        })
    }
}

/// `uname -m` of this process, for interpreters that don't report a machine
fn running_machine() -> Result<String> {
    let info =
        PlatformInfo::new().map_err(|e| anyhow!("Failed to fetch platform information: {e}"))?;
    Ok(info.machine().to_string_lossy().into_owned())
}
