//! Entry points for the packaging tool's build phases.
//!
//! An adapter for a concrete packaging tool calls these from its own commands:
//! [before_build_ext] when extensions are built, [console_scripts] while
//! finalizing entry points and [extra_source_files] when assembling an sdist.

use crate::build_options::BuildOptions;
use crate::RustExtension;
use anyhow::Result;
use fs_err as fs;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Builds and installs all extensions before the packaging tool builds its own.
///
/// `inplace` and `plat_name` are the packaging tool's `build_ext` options and
/// take precedence over `options`.
#[instrument(skip_all)]
pub fn before_build_ext(
    options: BuildOptions,
    inplace: bool,
    plat_name: Option<String>,
) -> Result<Vec<PathBuf>> {
    options
        .into_build_context()
        .inplace(inplace)
        .plat_name(plat_name)
        .build()?
        .run()
}

/// Adds the launcher entry points of script executables to `existing`, skipping duplicates
pub fn console_scripts(
    existing: Vec<String>,
    extensions: &[RustExtension],
) -> Result<Vec<String>> {
    let mut scripts = existing;
    for ext in extensions {
        for entry_point in ext.entry_points()? {
            if !scripts.contains(&entry_point) {
                scripts.push(entry_point);
            }
        }
    }
    Ok(scripts)
}

/// Files a source distribution needs to rebuild the extensions: every manifest,
/// its `Cargo.lock` and `build.rs` when present, and everything under `src/`
pub fn extra_source_files(extensions: &[RustExtension]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for ext in extensions {
        if !files.contains(&ext.path) {
            files.push(ext.path.clone());
        }
        let crate_dir = match ext.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        for extra in ["Cargo.lock", "build.rs"] {
            let path = crate_dir.join(extra);
            if path.is_file() && !files.contains(&path) {
                files.push(path);
            }
        }
        let src = crate_dir.join("src");
        if src.is_dir() {
            for path in walk_files(&src)? {
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
    }
    Ok(files)
}

/// All files below `dir`, sorted per directory
fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();
    let mut files = Vec::new();
    for path in entries {
        if path.is_dir() {
            files.extend(walk_files(&path)?);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}
