use crate::bridge::WheelLimitedApi;
use crate::build_context::run_extensions;
use crate::compile::{run_cargo, CargoCommand};
use crate::metadata::MetadataCache;
use crate::toolchain::Toolchain;
use crate::util::EnvVars;
use crate::{BuildError, RustExtension};
use anyhow::Result;
use semver::VersionReq;
use std::collections::BTreeSet;
use tracing::instrument;

/// Oldest rustc `check` accepts at all, independent of the extensions' `rust-version`
const MIN_RUST_VERSION: &str = ">=1.16";

/// `cargo check` for one extension, including the binding features
pub fn check_command(ext: &RustExtension, cargo: &str, env: &EnvVars) -> CargoCommand {
    let mut args = vec![
        "check".to_string(),
        "--manifest-path".to_string(),
        ext.path.display().to_string(),
    ];
    if !ext.uses_exec() {
        args.push("--lib".to_string());
    }
    let wheel = WheelLimitedApi::Disabled;
    let mut features: BTreeSet<String> = ext.features.iter().cloned().collect();
    features.extend(
        ext.binding
            .features(ext.py_limited_api.resolve(&wheel), &wheel),
    );
    if !features.is_empty() {
        args.push("--features".to_string());
        args.push(features.into_iter().collect::<Vec<_>>().join(" "));
    }
    args.extend(ext.args.iter().cloned());
    args.extend(ext.cargo_manifest_args.iter().cloned());

    let mut env = env.clone();
    env.extend(ext.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    CargoCommand {
        program: cargo.to_string(),
        args,
        env,
        quiet: true,
    }
}

/// Type checks every extension with `cargo check`.
///
/// A compiler older than the minimum is reported and nothing is checked.
#[instrument(skip_all)]
pub fn check_extensions(
    extensions: &[RustExtension],
    toolchain: &dyn Toolchain,
    metadata: &MetadataCache,
    cargo: &str,
    env: &EnvVars,
) -> Result<()> {
    if extensions.is_empty() {
        return Ok(());
    }
    if let Ok(version) = toolchain.version(env) {
        let min_version = VersionReq::parse(MIN_RUST_VERSION)?;
        if !min_version.matches(&version) {
            eprintln!(
                "⚠️  Warning: Rust version mismatch: required rust{min_version} got rust{version}"
            );
            return Ok(());
        }
    }

    run_extensions("check", extensions, toolchain, env, |ext| {
        if !ext.path.is_file() {
            return Err(BuildError::ManifestMissing(ext.path.clone()).into());
        }
        run_cargo(&check_command(ext, cargo, env))?;
        if ext.uses_exec() {
            eprintln!("✅ Extension {} checked", ext.name);
        } else {
            let lib_name = metadata.lib_name(ext, cargo, env)?;
            eprintln!("✅ Extension {} ({lib_name}) checked", ext.name);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Binding, PyLimitedApi};
    use crate::toolchain::tests::FakeToolchain;
    use expect_test::expect;
    use std::path::PathBuf;

    #[test]
    fn test_check_command() {
        let ext = RustExtension {
            path: PathBuf::from("rust/Cargo.toml"),
            features: vec!["fast".to_string()],
            py_limited_api: PyLimitedApi::ForceOn,
            args: vec!["--locked".to_string()],
            ..RustExtension::new("hello.rust")
        };
        let command = check_command(&ext, "cargo", &EnvVars::new());
        expect![[r#"cargo check --manifest-path rust/Cargo.toml --lib --features 'fast pyo3/abi3 pyo3/extension-module' --locked"#]]
            .assert_eq(&command.command_line());

        let exec = RustExtension {
            binding: Binding::Exec,
            ..RustExtension::new("hello-cli")
        };
        expect![[r#"cargo check --manifest-path Cargo.toml"#]]
            .assert_eq(&check_command(&exec, "cargo", &EnvVars::new()).command_line());
    }

    #[test]
    fn test_old_compiler_skips_check() {
        let mut toolchain = FakeToolchain::new(&[]);
        toolchain.version = semver::Version::new(1, 15, 1);
        let ext = RustExtension {
            path: PathBuf::from("/definitely/missing/Cargo.toml"),
            ..RustExtension::new("hello.rust")
        };
        check_extensions(
            &[ext.clone()],
            &toolchain,
            &MetadataCache::new(),
            "cargo",
            &EnvVars::new(),
        )
        .unwrap();

        toolchain.version = semver::Version::new(1, 80, 0);
        let err = check_extensions(
            &[ext],
            &toolchain,
            &MetadataCache::new(),
            "cargo",
            &EnvVars::new(),
        )
        .unwrap_err();
        insta::assert_snapshot!(err, @"can't find Rust extension project file: /definitely/missing/Cargo.toml");
    }
}
