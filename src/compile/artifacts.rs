use super::CargoCommand;
use crate::BuildError;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread;
use tracing::{debug, instrument};

/// A compiled module and where cargo put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltModule {
    /// Dotted python path of the module
    pub module_name: String,
    pub path: PathBuf,
}

/// The parts of a cargo JSON message we look at
#[derive(Debug, Deserialize)]
struct CargoBuildEvent {
    reason: String,
    #[serde(default)]
    package_id: Option<String>,
    #[serde(default)]
    target: Option<CargoBuildEventTarget>,
    #[serde(default)]
    filenames: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CargoBuildEventTarget {
    #[serde(default)]
    kind: Vec<String>,
}

/// Runs cargo and returns the lines it printed to stdout.
///
/// stderr is forwarded to the user unless the command is quiet, in which case it
/// is captured and becomes part of the error.
#[instrument(skip_all)]
pub fn run_cargo(command: &CargoCommand) -> Result<Vec<String>> {
    let mut cmd = command.to_command();
    cmd.stdout(Stdio::piped());
    cmd.stderr(if command.quiet {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });
    debug!("Running {}", command.command_line());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(BuildError::ToolchainMissing {
                program: command.program.clone(),
            }
            .into())
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to run `{}`", command.command_line()))
        }
    };

    // Drained on a separate thread so a chatty stderr can't block stdout
    let stderr_reader = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer);
            buffer
        })
    });

    let mut lines = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            lines.push(line.context("Failed to read cargo output")?);
        }
    }
    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for `{}`", command.command_line()))?;
    let stderr = stderr_reader.and_then(|handle| handle.join().ok());

    if !status.success() {
        let code = status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        let mut message = format!("`{}` failed with code {code}", command.command_line());
        if let Some(stderr) = stderr.filter(|stderr| !stderr.is_empty()) {
            message.push_str("\n-- Output captured from stderr:\n");
            message.push_str(stderr.trim_end());
        }
        return Err(BuildError::CompileError(message).into());
    }
    Ok(lines)
}

/// Collects the filenames of `compiler-artifact` messages of `package_id`
/// whose kind is one of `kinds`, in the order cargo reported them.
pub fn find_cargo_artifacts<S: AsRef<str>>(
    lines: &[S],
    package_id: &str,
    kinds: &[&str],
) -> Vec<String> {
    lines
        .iter()
        .map(|line| -> &str { line.as_ref() })
        // only parse lines that can possibly match
        .filter(|line| line.contains("compiler-artifact") && line.contains(package_id))
        .filter_map(|line| serde_json::from_str::<CargoBuildEvent>(line).ok())
        .filter(|event| {
            event.reason == "compiler-artifact" && event.package_id.as_deref() == Some(package_id)
        })
        .flat_map(|event| {
            let event_kinds = event.target.map(|target| target.kind).unwrap_or_default();
            event_kinds
                .into_iter()
                .zip(event.filenames)
                .filter(|(kind, _)| kinds.contains(&kind.as_str()))
                .map(|(_, filename)| filename)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// A library build must produce exactly one cdylib or dylib
pub fn select_library_artifact(artifacts: Vec<String>) -> Result<String> {
    match <[String; 1]>::try_from(artifacts) {
        Ok([artifact]) => Ok(artifact),
        Err(artifacts) if artifacts.is_empty() => Err(BuildError::ArtifactNotFound(
            "unable to find any cdylib or dylib build artifacts".to_string(),
        )
        .into()),
        Err(artifacts) => Err(BuildError::AmbiguousArtifact(artifacts).into()),
    }
}

/// Matches every declared binary to the artifact with that file stem.
///
/// An empty binary name stands for the last component of its destination.
/// Returns `(destination, artifact)` pairs in declaration order.
pub fn select_executables(
    artifacts: &[String],
    targets: &IndexMap<String, String>,
) -> Result<Vec<(String, String)>> {
    targets
        .iter()
        .map(|(name, dest)| {
            let name = if name.is_empty() {
                dest.rsplit('.').next().unwrap_or(dest)
            } else {
                name.as_str()
            };
            let artifact = artifacts
                .iter()
                .find(|artifact| {
                    Path::new(artifact.as_str())
                        .file_stem()
                        .is_some_and(|stem| stem == name)
                })
                .ok_or_else(|| {
                    BuildError::ArtifactNotFound(format!("unable to locate executable '{name}'"))
                })?;
            Ok((dest.clone(), artifact.clone()))
        })
        .collect()
}

/// Maps a path inside the `cross` container onto the local target directory
pub fn replace_cross_target_dir(
    path: &str,
    cross_target_dir: &Path,
    local_target_dir: &Path,
) -> String {
    path.replace(
        &cross_target_dir.display().to_string(),
        &local_target_dir.display().to_string(),
    )
}
