//! The python interpreter the extensions are built for.
//!
//! Everything we need from it (suffixes, platform, cross compilation
//! configuration) is read once by running a small script.

use crate::target::InterpreterBuildConfig;
use crate::util::EnvVars;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, instrument};

const GET_INTERPRETER_METADATA: &str = include_str!("get_interpreter_metadata.py");

/// The output format of [GET_INTERPRETER_METADATA]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InterpreterMetadata {
    pub executable: Option<PathBuf>,
    /// `sysconfig.get_platform()`, e.g. `linux-x86_64` or `win-amd64`
    pub platform: String,
    /// `platform.machine()`
    pub machine: String,
    /// e.g. `.cpython-311-x86_64-linux-gnu.so`
    pub ext_suffix: Option<String>,
    /// `.abi3.so` on unix, `.pyd` on windows
    pub abi3_suffix: Option<String>,
    /// `.exe` on windows
    pub exe: Option<String>,
    pub host_gnu_type: Option<String>,
    pub build_gnu_type: Option<String>,
    pub bldshared: Option<String>,
    pub stdlib: Option<PathBuf>,
}

impl InterpreterMetadata {
    /// The parts relevant for cross compile detection
    pub fn build_config(&self) -> InterpreterBuildConfig {
        InterpreterBuildConfig {
            host_gnu_type: self.host_gnu_type.clone(),
            build_gnu_type: self.build_gnu_type.clone(),
            bldshared: self.bldshared.clone(),
            stdlib: self.stdlib.clone(),
        }
    }
}

/// A python interpreter and its sysconfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonInterpreter {
    pub executable: PathBuf,
    pub metadata: InterpreterMetadata,
}

impl fmt::Display for PythonInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "python at {} ({})",
            self.executable.display(),
            self.metadata.platform
        )
    }
}

impl PythonInterpreter {
    /// The interpreter to use when none was given: `python` on windows, `python3` elsewhere
    pub fn default_executable() -> PathBuf {
        if cfg!(windows) {
            PathBuf::from("python")
        } else {
            PathBuf::from("python3")
        }
    }

    /// Queries `executable` for its metadata
    #[instrument(skip_all, fields(executable = %executable.as_ref().display()))]
    pub fn check_executable(executable: impl AsRef<Path>) -> Result<Self> {
        let executable = executable.as_ref();
        let output = run_script(executable, GET_INTERPRETER_METADATA)?;
        let metadata: InterpreterMetadata = serde_json::from_str(&output)
            .with_context(|| format!("Failed to parse the metadata of {}", executable.display()))
            .context(output.trim().to_string())?;
        debug!(?metadata, "Found python interpreter");
        Ok(Self {
            executable: metadata
                .executable
                .clone()
                .unwrap_or_else(|| executable.to_path_buf()),
            metadata,
        })
    }

    /// Environment cargo runs in, so that pyo3 and python-sys build against this interpreter
    pub fn build_env(&self) -> Result<EnvVars> {
        let mut env = EnvVars::new();
        if let Some(bindir) = self.executable.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            let path = env::var_os("PATH").unwrap_or_default();
            let joined = env::join_paths(
                std::iter::once(bindir.to_path_buf()).chain(env::split_paths(&path)),
            )
            .context("Failed to add the interpreter directory to PATH")?;
            env.insert("PATH".to_string(), lossy(joined));
        }
        let executable = self.executable.display().to_string();
        for key in ["PYTHON_SYS_EXECUTABLE", "PYO3_PYTHON"] {
            let value = env::var(key).unwrap_or_else(|_| executable.clone());
            env.insert(key.to_string(), value);
        }
        Ok(env)
    }
}

fn lossy(value: OsString) -> String {
    value.to_string_lossy().into_owned()
}

/// Run a python script using the given interpreter.
fn run_script(executable: &Path, script: &str) -> Result<String> {
    let out = Command::new(executable)
        .env("PYTHONIOENCODING", "utf-8")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .and_then(|mut child| {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(script.as_bytes())?;
            }
            child.wait_with_output()
        });

    match out {
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                bail!(
                    "Could not find any interpreter at {}, \
                     are you sure you have Python installed on your PATH?",
                    executable.display()
                );
            } else {
                bail!(
                    "Failed to run the Python interpreter at {}: {}",
                    executable.display(),
                    err
                );
            }
        }
        Ok(ok) if !ok.status.success() => bail!("Python script failed"),
        Ok(ok) => Ok(String::from_utf8(ok.stdout)?),
    }
}
