use crate::build_context::run_extensions;
use crate::toolchain::Toolchain;
use crate::util::{format_command_line, EnvVars};
use crate::RustExtension;
use anyhow::Result;
use std::process::{Command, Stdio};
use tracing::{debug, instrument};

/// `cargo clean --manifest-path <path> <manifest args>`
pub fn clean_args(ext: &RustExtension) -> Vec<String> {
    let mut args = vec![
        "clean".to_string(),
        "--manifest-path".to_string(),
        ext.path.display().to_string(),
    ];
    args.extend(ext.cargo_manifest_args.iter().cloned());
    args
}

/// Runs `cargo clean` for every extension, ignoring failures of cargo itself
#[instrument(skip_all)]
pub fn clean_extensions(
    extensions: &[RustExtension],
    toolchain: &dyn Toolchain,
    cargo: &str,
    env: &EnvVars,
) -> Result<()> {
    run_extensions("clean", extensions, toolchain, env, |ext| {
        let args = clean_args(ext);
        if !ext.quiet {
            eprintln!("{}", format_command_line(cargo, &args));
        }
        let status = Command::new(cargo)
            .args(&args)
            .envs(env)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        debug!(?status, "cargo clean finished");
        Ok(())
    })
}
