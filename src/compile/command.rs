use crate::bridge::WheelLimitedApi;
use crate::target::ResolvedTarget;
use crate::toolchain::RustcCfgs;
use crate::util::{format_command_line, EnvVars};
use crate::RustExtension;
use anyhow::Result;
use std::collections::BTreeSet;
use std::process::Command;

/// Cargo's message format: JSON on stdout, rendered diagnostics on stderr
const MESSAGE_FORMAT: &str = "--message-format=json-render-diagnostics";

/// A fully assembled cargo invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CargoCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Set on top of the inherited environment
    pub env: EnvVars,
    /// Capture stderr instead of forwarding it
    pub quiet: bool,
}

impl CargoCommand {
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        command
    }

    /// The command line, with whitespace-containing arguments quoted
    pub fn command_line(&self) -> String {
        format_command_line(&self.program, &self.args)
    }
}

/// Settings for one cargo build that do not come from the extension itself
#[derive(Debug, Clone, Copy)]
pub struct CargoBuildSettings<'a> {
    /// `cargo`, or `$CARGO`
    pub cargo: &'a str,
    pub release: bool,
    pub quiet: bool,
    /// `-v` count of the run, capped at cargo's `-vv`
    pub verbose: u8,
    pub wheel_limited_api: &'a WheelLimitedApi,
    /// `rustc --print cfg` for the resolved target
    pub cfgs: &'a RustcCfgs,
    /// File name the library is installed as, used as the macOS install name
    pub install_name: &'a str,
    /// Interpreter environment the build runs in
    pub base_env: &'a EnvVars,
    /// `RUSTFLAGS` of the calling process
    pub rustflags: Option<&'a str>,
}

/// Assembles the cargo argv and environment for building `ext` for `target`.
///
/// Executables use `cargo build`, libraries use `cargo rustc --lib` so the crate
/// type can be forced to `cdylib` after `--`.
pub fn build_command(
    ext: &RustExtension,
    target: &ResolvedTarget,
    settings: &CargoBuildSettings,
) -> Result<CargoCommand> {
    let manifest_path = ext.path.display().to_string();
    let cargo_args = cargo_args(ext, target, settings)?;

    let mut rustflags = Vec::new();
    let mut args: Vec<String>;
    if ext.uses_exec() {
        args = vec![
            "build".to_string(),
            "--manifest-path".to_string(),
            manifest_path,
            MESSAGE_FORMAT.to_string(),
        ];
        args.extend(cargo_args);
        if ext.native {
            rustflags.push("-Ctarget-cpu=native".to_string());
        }
        if let Some(linker) = &target.linker {
            rustflags.push(format!("-Clinker={linker}"));
        }
    } else {
        let mut rustc_args = vec!["--crate-type".to_string(), "cdylib".to_string()];
        rustc_args.extend(ext.rustc_flags.iter().cloned());

        let target_os = settings.cfgs.get("target_os");
        if target_os == Some("macos") {
            rustc_args.extend([
                "-C".to_string(),
                format!(
                    "link-args=-undefined dynamic_lookup -Wl,-install_name,@rpath/{}",
                    settings.install_name
                ),
            ]);
        }
        if settings.cfgs.get("target_env") == Some("musl") {
            // rustc refuses to build a cdylib with this on the command line
            rustflags.push("-Ctarget-feature=-crt-static".to_string());
        } else if (settings.cfgs.get("target_arch"), target_os)
            == (Some("wasm32"), Some("emscripten"))
        {
            rustc_args.extend([
                "-C".to_string(),
                "link-args=-sSIDE_MODULE=2 -sWASM_BIGINT".to_string(),
            ]);
        }
        if ext.native {
            rustc_args.extend(["-C".to_string(), "target-cpu=native".to_string()]);
        }
        if let Some(linker) = &target.linker {
            rustc_args.extend(["-C".to_string(), format!("linker={linker}")]);
        }

        args = vec![
            "rustc".to_string(),
            "--lib".to_string(),
            MESSAGE_FORMAT.to_string(),
            "--manifest-path".to_string(),
            manifest_path,
        ];
        args.extend(cargo_args);
        args.push("--".to_string());
        args.extend(rustc_args);
    }

    let mut env = settings.base_env.clone();
    env.extend(ext.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(cross_lib) = &target.cross_lib {
        env.insert(
            "PYO3_CROSS_LIB_DIR".to_string(),
            cross_lib.display().to_string(),
        );
    }
    if !rustflags.is_empty() {
        let existing = ext
            .env
            .get("RUSTFLAGS")
            .map(String::as_str)
            .or(settings.rustflags)
            .filter(|flags| !flags.is_empty());
        rustflags.extend(existing.map(ToString::to_string));
        env.insert("RUSTFLAGS".to_string(), rustflags.join(" "));
    }

    Ok(CargoCommand {
        program: settings.cargo.to_string(),
        args,
        env,
        quiet: settings.quiet,
    })
}

/// Arguments shared by `cargo build` and `cargo rustc`
fn cargo_args(
    ext: &RustExtension,
    target: &ResolvedTarget,
    settings: &CargoBuildSettings,
) -> Result<Vec<String>> {
    let mut args = Vec::new();
    if let Some(triple) = &target.triple {
        args.extend(["--target".to_string(), triple.clone()]);
    }
    if settings.release && ext.cargo_profile()?.is_none() {
        args.push("--release".to_string());
    }
    if settings.quiet {
        args.push("-q".to_string());
    } else if settings.verbose > 0 {
        args.push(format!("-{}", "v".repeat(settings.verbose.min(2).into())));
    }

    let mut features: BTreeSet<String> = ext
        .features
        .iter()
        .map(|feature| feature.trim().to_string())
        .filter(|feature| !feature.is_empty())
        .collect();
    features.extend(
        ext.binding.features(
            ext.py_limited_api.resolve(settings.wheel_limited_api),
            settings.wheel_limited_api,
        ),
    );
    if !features.is_empty() {
        args.push("--features".to_string());
        args.push(features.into_iter().collect::<Vec<_>>().join(" "));
    }

    args.extend(ext.args.iter().cloned());
    args.extend(ext.cargo_manifest_args.iter().cloned());
    Ok(args)
}
