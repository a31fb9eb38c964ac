use super::BuiltModule;
use crate::target::UNIVERSAL2_ARM64;
use crate::util::display_command;
use crate::BuildError;
use anyhow::{anyhow, Context, Result};
use fat_macho::FatWriter;
use fs_err as fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Merges the per-architecture libraries of both builds into fat binaries.
///
/// Modules are paired in the order the builds reported them; the fat file lives
/// where the arm64 artifact would be without the target directory component.
pub fn merge_universal2(
    arm64: Vec<BuiltModule>,
    x86_64: Vec<BuiltModule>,
) -> Result<Vec<BuiltModule>> {
    arm64
        .into_iter()
        .zip(x86_64)
        .map(|(arm64, x86_64)| {
            let fat_path = universal2_path(&arm64.path);
            if let Some(parent) = fat_path.parent() {
                fs::create_dir_all(parent)?;
            }
            create_universal2_binary(&fat_path, &[arm64.path, x86_64.path])?;
            Ok(BuiltModule {
                module_name: arm64.module_name,
                path: fat_path,
            })
        })
        .collect()
}

/// `target/aarch64-apple-darwin/release/libfoo.dylib` -> `target/release/libfoo.dylib`
pub fn universal2_path(arm64_path: &Path) -> PathBuf {
    PathBuf::from(
        arm64_path
            .to_string_lossy()
            .replace(&format!("{UNIVERSAL2_ARM64}/"), ""),
    )
}

/// Combines Mach-O files with `lipo`, falling back to writing the fat file ourselves
pub fn create_universal2_binary(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let mut lipo = Command::new("lipo");
    lipo.arg("-create").arg("-output").arg(output).args(inputs);
    debug!("Running {}", display_command(&lipo));
    match lipo.output() {
        Ok(result) if result.status.success() => Ok(()),
        Ok(result) => {
            let code = result
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            Err(BuildError::CompileError(format!(
                "lipo failed with code: {code}\n{}{}",
                String::from_utf8_lossy(&result.stdout),
                String::from_utf8_lossy(&result.stderr)
            ))
            .into())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("lipo not found, writing the fat binary with fat-macho");
            write_fat_binary(output, inputs).map_err(|err| {
                BuildError::CompileError(format!(
                    "Failed to create universal2 binary {}: {err:#}",
                    output.display()
                ))
                .into()
            })
        }
        Err(err) => {
            Err(err).with_context(|| format!("Failed to run {}", display_command(&lipo)))
        }
    }
}

fn write_fat_binary(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let mut writer = FatWriter::new();
    for input in inputs {
        writer
            .add(fs::read(input)?)
            .map_err(|err| anyhow!("{}: {:?}", input.display(), err))?;
    }
    writer
        .write_to_file(output)
        .map_err(|err| anyhow!("{:?}", err))?;
    Ok(())
}
