//! Placing built artifacts where the packaging tool expects them.

use crate::compile::BuiltModule;
use crate::extension::Strip;
use crate::host::PackagingHost;
use crate::target::strips_platform_tag;
use crate::util::{append_to_file_name, display_command, split_platform_and_extension};
use crate::RustExtension;
use anyhow::{Context, Result};
use fs_err as fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, instrument};

/// Copies artifacts into the locations the [PackagingHost] names
pub struct Installer<'a> {
    host: &'a dyn PackagingHost,
}

impl<'a> Installer<'a> {
    pub fn new(host: &'a dyn PackagingHost) -> Self {
        Self { host }
    }

    /// Destination of the library for module `target_fname`.
    ///
    /// Limited API builds use the abi3 suffix, and the platform tag is dropped
    /// when it names another architecture than the one we build for.
    pub fn dylib_ext_path(&self, ext: &RustExtension, target_fname: &str) -> PathBuf {
        let mut ext_path = self.host.get_ext_fullpath(target_fname);

        if ext.py_limited_api.resolve(self.host.py_limited_api()) {
            if let Some(abi3_suffix) = self.host.abi3_suffix() {
                let path = ext_path.to_string_lossy().into_owned();
                if let Some(stem) = path.strip_suffix(self.host.ext_suffix()) {
                    ext_path = PathBuf::from(format!("{stem}{abi3_suffix}"));
                }
            }
        }

        if strips_platform_tag(
            &ext_path.to_string_lossy(),
            self.host.plat_name(),
            self.host.host_platform(),
        ) {
            let (base, _, extension) = split_platform_and_extension(&ext_path);
            ext_path = append_to_file_name(&base, &extension);
        }
        ext_path
    }

    /// Destination of an executable for module `module_name`, writing the
    /// launcher script if the extension asks for one
    fn exe_path(&self, ext: &RustExtension, module_name: &str) -> Result<PathBuf> {
        let exe = self.host.exe_suffix();
        if ext.bin {
            let scripts_dir = self
                .host
                .build_lib()
                .join(self.host.data_dir())
                .join("scripts");
            fs::create_dir_all(&scripts_dir)?;
            return Ok(scripts_dir.join(format!("{module_name}{exe}")));
        }
        let (base, _, _) = split_platform_and_extension(&self.host.get_ext_fullpath(module_name));
        let ext_path = append_to_file_name(&base, exe);
        if let Some(parent) = ext_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let short_name = module_name.rsplit('.').next().unwrap_or(module_name);
        ext.install_script(short_name, &ext_path)?;
        Ok(ext_path)
    }

    /// Installs every built module of `ext` and returns the installed paths
    #[instrument(skip_all, fields(ext = %ext.name))]
    pub fn install(
        &self,
        ext: &RustExtension,
        modules: &[BuiltModule],
        debug_build: bool,
    ) -> Result<Vec<PathBuf>> {
        let mut installed = Vec::with_capacity(modules.len());
        for module in modules {
            let module_name = if module.module_name.is_empty() {
                module_name_from_library(&module.path)
            } else {
                module.module_name.clone()
            };

            let ext_path = if ext.uses_exec() {
                self.exe_path(ext, &module_name)?
            } else {
                let ext_path = self.dylib_ext_path(ext, &module_name);
                if let Some(parent) = ext_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                ext_path
            };

            if !ext.quiet {
                eprintln!(
                    "📦 Copying rust artifact from {} to {}",
                    module.path.display(),
                    ext_path.display()
                );
            }
            replace_file(&module.path, &ext_path)?;

            if !cfg!(windows) && !debug_build {
                strip(&ext_path, ext.strip);
            }
            copy_read_bits_to_exec(&ext_path)?;
            installed.push(ext_path);
        }
        Ok(installed)
    }
}

/// `target/release/libhello.so` -> `hello`
fn module_name_from_library(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let without_prefix = file_name.get(3..).unwrap_or_default();
    match without_prefix.rfind('.') {
        Some(index) if index > 0 => without_prefix[..index].to_string(),
        _ => without_prefix.to_string(),
    }
}

/// Copies `source` next to `dest` and renames it over `dest`.
///
/// A process that has the old file mapped keeps its inode intact; copying onto
/// `dest` directly would modify a loaded library in place.
pub fn replace_file(source: &Path, dest: &Path) -> Result<()> {
    let temp = append_to_file_name(dest, "~");
    fs::copy(source, &temp)?;
    if let Err(err) = fs::rename(&temp, dest) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}

/// Runs `strip -x` or `strip -S`; a missing or failing `strip` is not an error
fn strip(path: &Path, policy: Strip) {
    let flag = match policy {
        Strip::No => return,
        Strip::Debug => "-S",
        Strip::All => "-x",
    };
    let mut command = Command::new("strip");
    command.arg(flag).arg(path);
    match command.output() {
        Ok(output) if output.status.success() => {}
        Ok(output) => debug!(
            "`{}` failed with {}, ignoring",
            display_command(&command),
            output.status
        ),
        Err(err) => debug!("Failed to run `{}`: {err}, ignoring", display_command(&command)),
    }
}

/// Shared libraries and executables need the x bits wherever they have r bits
#[cfg(unix)]
fn copy_read_bits_to_exec(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    permissions.set_mode(mode | (mode & 0o444) >> 2);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
fn copy_read_bits_to_exec(_path: &Path) -> Result<()> {
    Ok(())
}
