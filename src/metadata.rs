use crate::toolchain::lock;
use crate::util::{format_command_line, EnvVars};
use crate::{BuildError, RustExtension};
use anyhow::Result;
use cargo_metadata::{Metadata, MetadataCommand, TargetKind};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Memoized `cargo metadata` results, keyed by manifest path and cargo program.
///
/// `cross` and `cargo` report different target directories for the same
/// manifest, hence the program is part of the key.
#[derive(Debug, Default)]
pub struct MetadataCache {
    cache: Mutex<HashMap<(PathBuf, String), Arc<Metadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cargo metadata --manifest-path <path> --format-version 1 <manifest args>`
    pub fn metadata(
        &self,
        ext: &RustExtension,
        cargo: &str,
        env: &EnvVars,
    ) -> Result<Arc<Metadata>> {
        let key = (ext.path.clone(), cargo.to_string());
        let mut cache = lock(&self.cache);
        if let Some(metadata) = cache.get(&key) {
            return Ok(metadata.clone());
        }

        let mut command = MetadataCommand::new();
        command
            .cargo_path(cargo)
            .manifest_path(&ext.path)
            .other_options(ext.cargo_manifest_args.clone());
        for (key, value) in env {
            command.env(key, value);
        }
        debug!("Running {:?}", command.cargo_command());
        let metadata = command.exec().map_err(|err| metadata_error(err, ext, cargo))?;
        let metadata = Arc::new(metadata);
        cache.insert(key, metadata.clone());
        Ok(metadata)
    }

    /// The package id cargo reports for the manifest's own package
    pub fn root_package_id(
        &self,
        ext: &RustExtension,
        cargo: &str,
        env: &EnvVars,
    ) -> Result<String> {
        let metadata = self.metadata(ext, cargo, env)?;
        metadata
            .resolve
            .as_ref()
            .and_then(|resolve| resolve.root.as_ref())
            .map(|root| root.repr.clone())
            .ok_or_else(|| BuildError::VirtualManifest(ext.path.clone()).into())
    }

    /// Where cargo puts its build output for this manifest
    pub fn target_directory(
        &self,
        ext: &RustExtension,
        cargo: &str,
        env: &EnvVars,
    ) -> Result<PathBuf> {
        let metadata = self.metadata(ext, cargo, env)?;
        Ok(metadata.target_directory.clone().into_std_path_buf())
    }

    /// The library name of the root package, with `-` replaced by `_`
    pub fn lib_name(&self, ext: &RustExtension, cargo: &str, env: &EnvVars) -> Result<String> {
        let root = self.root_package_id(ext, cargo, env)?;
        let metadata = self.metadata(ext, cargo, env)?;
        let package = metadata
            .packages
            .iter()
            .find(|package| package.id.repr == root)
            .ok_or_else(|| BuildError::VirtualManifest(ext.path.clone()))?;
        let name = package
            .targets
            .iter()
            .find(|target| {
                target.kind.iter().any(|kind| {
                    matches!(
                        kind,
                        TargetKind::Lib
                            | TargetKind::CDyLib
                            | TargetKind::DyLib
                            | TargetKind::RLib
                            | TargetKind::StaticLib
                    )
                })
            })
            .map(|target| target.name.as_str())
            .unwrap_or(package.name.as_str());
        Ok(name.replace('-', "_"))
    }
}

fn metadata_error(err: cargo_metadata::Error, ext: &RustExtension, cargo: &str) -> anyhow::Error {
    let command = format_command_line(
        cargo,
        ["metadata", "--manifest-path"]
            .into_iter()
            .map(String::from)
            .chain([ext.path.display().to_string()])
            .chain(["--format-version".to_string(), "1".to_string()])
            .chain(ext.cargo_manifest_args.iter().cloned()),
    );
    match err {
        cargo_metadata::Error::Io(err) if err.kind() == io::ErrorKind::NotFound => {
            BuildError::ToolchainMissing {
                program: cargo.to_string(),
            }
            .into()
        }
        cargo_metadata::Error::CargoMetadata { stderr } => BuildError::CompileError(format!(
            "`{command}` failed\n-- Output captured from stderr:\n{}",
            stderr.trim_end()
        ))
        .into(),
        err => anyhow::Error::new(err).context(format!("`{command}` failed")),
    }
}
