mod builder;

pub use builder::BuildContextBuilder;

use crate::compile::{
    build_command, find_cargo_artifacts, merge_universal2, replace_cross_target_dir, run_cargo,
    select_executables, select_library_artifact, BuiltModule, CargoBuildSettings,
};
use crate::host::PackagingHost;
use crate::install::Installer;
use crate::metadata::MetadataCache;
use crate::target::{
    resolve_target, CrossSignals, ResolvedTarget, TargetSpec, TargetTriple, UNIVERSAL2_ARM64,
    UNIVERSAL2_X86_64,
};
use crate::toolchain::Toolchain;
use crate::util::EnvVars;
use crate::{BuildError, RustExtension};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Contains everything required to build and install the declared extensions
pub struct BuildContext {
    /// Extensions in declaration order
    pub extensions: Vec<RustExtension>,
    /// The packaging tool driving the build
    pub host: Box<dyn PackagingHost>,
    /// `--target`, `universal2-apple-darwin` included
    pub target: Option<TargetTriple>,
    /// Architecture flags and interpreter build configuration
    pub signals: CrossSignals,
    /// Pass `-q` to cargo for every extension
    pub qbuild: bool,
    /// `-v` count
    pub verbose: u8,
    /// `cargo`, or `$CARGO`
    pub cargo: String,
    /// Environment every toolchain call runs with
    pub base_env: EnvVars,
    /// `RUSTFLAGS` of this process
    pub rustflags: Option<String>,
    pub toolchain: Box<dyn Toolchain>,
    pub metadata: MetadataCache,
}

impl BuildContext {
    /// Builds and installs every extension, returning the installed paths.
    ///
    /// A failing optional extension prints a warning and the others are
    /// still built; any other failure aborts the run.
    #[instrument(skip_all)]
    pub fn run(&self) -> Result<Vec<PathBuf>> {
        let mut installed = Vec::new();
        run_extensions(
            "build",
            &self.extensions,
            self.toolchain.as_ref(),
            &self.base_env,
            |ext| {
                installed.extend(self.run_for_extension(ext)?);
                Ok(())
            },
        )?;
        Ok(installed)
    }

    /// Resolves the target, builds and installs a single extension
    #[instrument(skip_all, fields(ext = %ext.name))]
    pub fn run_for_extension(&self, ext: &RustExtension) -> Result<Vec<PathBuf>> {
        let spec = resolve_target(
            self.host.plat_name(),
            self.target.as_ref(),
            &self.signals,
            self.toolchain.as_ref(),
            &self.base_env,
        )?;
        debug!(?spec, "Resolved target");
        let modules = match spec {
            TargetSpec::Single(target) => self.build_extension(ext, &target)?,
            TargetSpec::Universal2 => {
                let arm64 = self.build_extension(ext, &ResolvedTarget::triple(UNIVERSAL2_ARM64))?;
                let x86_64 =
                    self.build_extension(ext, &ResolvedTarget::triple(UNIVERSAL2_X86_64))?;
                merge_universal2(arm64, x86_64)?
            }
        };
        Installer::new(self.host.as_ref()).install(ext, &modules, self.is_debug_build(ext))
    }

    /// Runs cargo for one target and returns what it built, not yet installed
    pub fn build_extension(
        &self,
        ext: &RustExtension,
        target: &ResolvedTarget,
    ) -> Result<Vec<BuiltModule>> {
        if !ext.path.is_file() {
            return Err(BuildError::ManifestMissing(ext.path.clone()).into());
        }

        let cfgs = self.toolchain.cfgs(target.triple.as_deref(), &self.base_env)?;
        let quiet = self.qbuild || ext.quiet;
        let install_name = Installer::new(self.host.as_ref())
            .dylib_ext_path(ext, &ext.name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let settings = CargoBuildSettings {
            cargo: &self.cargo,
            release: !self.is_debug_build(ext),
            quiet,
            verbose: self.verbose,
            wheel_limited_api: self.host.py_limited_api(),
            cfgs: &cfgs,
            install_name: &install_name,
            base_env: &self.base_env,
            rustflags: self.rustflags.as_deref(),
        };
        let command = build_command(ext, target, &settings)?;

        if !quiet {
            match command.env.get("RUSTFLAGS") {
                Some(rustflags) => eprintln!("RUSTFLAGS={rustflags:?} {}", command.command_line()),
                None => eprintln!("{}", command.command_line()),
            }
        }
        let output = run_cargo(&command).context("Failed to build a native library through cargo")?;

        let package_id = self
            .metadata
            .root_package_id(ext, &self.cargo, &self.base_env)?;
        let artifacts = find_cargo_artifacts(&output, &package_id, ext.binding.artifact_kinds());
        debug!(?artifacts, "Found cargo artifacts");

        let mut modules = if ext.uses_exec() {
            select_executables(&artifacts, &ext.target)?
                .into_iter()
                .map(|(module_name, path)| BuiltModule {
                    module_name,
                    path: PathBuf::from(path),
                })
                .collect()
        } else {
            let path = select_library_artifact(artifacts)?;
            vec![BuiltModule {
                module_name: ext.name.clone(),
                path: PathBuf::from(path),
            }]
        };

        if self.cargo == "cross" {
            let cross_target_dir = self
                .metadata
                .target_directory(ext, &self.cargo, &self.base_env)?;
            let local_target_dir = self
                .metadata
                .target_directory(ext, "cargo", &self.base_env)?;
            for module in &mut modules {
                module.path = PathBuf::from(replace_cross_target_dir(
                    &module.path.to_string_lossy(),
                    &cross_target_dir,
                    &local_target_dir,
                ));
            }
        }
        Ok(modules)
    }

    /// `--release` wins, then `--debug`, then the extension's own setting,
    /// then in-place builds default to debug
    pub fn is_debug_build(&self, ext: &RustExtension) -> bool {
        if self.host.release() {
            return false;
        }
        self.host
            .debug()
            .or(ext.debug)
            .unwrap_or_else(|| self.host.inplace())
    }
}

/// Checks the compiler once, then runs `run_for_extension` for every extension.
///
/// When rustc can't be queried and every extension is optional this is not an
/// error. Failures of optional extensions are printed and skipped.
pub(crate) fn run_extensions<F>(
    command_name: &str,
    extensions: &[RustExtension],
    toolchain: &dyn Toolchain,
    env: &EnvVars,
    mut run_for_extension: F,
) -> Result<()>
where
    F: FnMut(&RustExtension) -> Result<()>,
{
    if extensions.is_empty() {
        return Ok(());
    }
    let all_optional = extensions.iter().all(|ext| ext.optional);
    let version = match toolchain.version(env) {
        Ok(version) => version,
        Err(err) if all_optional => {
            eprintln!("⚠️  Warning: {err:#}");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    debug!(%version, "Using rustc");

    for ext in extensions {
        let result = ext
            .check_rust_version(&version)
            .and_then(|()| run_for_extension(ext));
        match result {
            Ok(()) => {}
            Err(err) if ext.optional => eprintln!(
                "⚠️  Warning: {command_name}: optional Rust extension {} failed: {err:#}",
                ext.name
            ),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::linux_host;
    use crate::host::SysconfigHost;
    use crate::toolchain::tests::FakeToolchain;
    use fs_err as fs;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn context(extensions: Vec<RustExtension>, host: SysconfigHost) -> BuildContext {
        BuildContext {
            extensions,
            host: Box::new(host),
            target: None,
            signals: CrossSignals::default(),
            qbuild: true,
            verbose: 0,
            cargo: "cargo".to_string(),
            base_env: EnvVars::new(),
            rustflags: None,
            toolchain: Box::new(FakeToolchain::new(&[
                ("target_os", "linux"),
                ("target_env", "gnu"),
            ])),
            metadata: MetadataCache::new(),
        }
    }

    fn missing(name: &str, optional: bool) -> RustExtension {
        RustExtension {
            path: PathBuf::from(format!("/definitely/missing/{name}/Cargo.toml")),
            optional,
            ..RustExtension::new(name)
        }
    }

    fn missing_manifest(err: &anyhow::Error) -> Option<&Path> {
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::ManifestMissing(path)) => Some(path),
            _ => None,
        }
    }

    /// Writes a stand-in for cargo that reports `target_dir` from `metadata`
    /// and `artifact` as the cdylib of every build
    #[cfg(unix)]
    fn write_fake_cargo(path: &Path, target_dir: &Path, artifact: &Path) {
        use std::os::unix::fs::PermissionsExt;

        let package_id = "path+file:///hello#0.1.0";
        let metadata = serde_json::json!({
            "packages": [],
            "workspace_members": [],
            "resolve": { "nodes": [], "root": package_id },
            "workspace_root": "/hello",
            "target_directory": target_dir,
            "version": 1,
        });
        let message = serde_json::json!({
            "reason": "compiler-artifact",
            "package_id": package_id,
            "target": { "kind": ["cdylib"] },
            "filenames": [artifact],
        });
        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = metadata ]; then\n  printf '%s\\n' '{metadata}'\nelse\n  printf '%s\\n' '{message}'\nfi\n"
        );
        fs::write(path, script).unwrap();
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A manifest next to a prebuilt `target/release/libhello.so`
    #[cfg(unix)]
    fn write_built_crate(root: &Path) -> (RustExtension, PathBuf) {
        let artifact = root.join("target/release/libhello.so");
        fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        fs::write(&artifact, b"library").unwrap();
        fs::write(root.join("Cargo.toml"), "[package]\nname = \"hello\"\n").unwrap();
        let ext = RustExtension {
            path: root.join("Cargo.toml"),
            ..RustExtension::new("hello.rust")
        };
        (ext, artifact)
    }

    #[cfg(unix)]
    #[test]
    fn test_later_extension_installed_after_optional_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (ext, artifact) = write_built_crate(root);
        let cargo = root.join("fake-cargo");
        write_fake_cargo(&cargo, &root.join("target"), &artifact);

        let host = linux_host(&root.join("build/lib"));
        let mut ctx = context(vec![missing("first", true), ext.clone()], host.clone());
        ctx.cargo = cargo.display().to_string();

        let dest = Installer::new(&host).dylib_ext_path(&ext, &ext.name);
        assert_eq!(ctx.run().unwrap(), vec![dest.clone()]);
        assert_eq!(fs::read(&dest).unwrap(), b"library");
    }

    #[cfg(unix)]
    #[test]
    fn test_cross_artifacts_map_to_local_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (ext, artifact) = write_built_crate(root);
        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let container_target = Path::new("/target");
        write_fake_cargo(
            &bin.join("cross"),
            container_target,
            &container_target.join("release/libhello.so"),
        );
        write_fake_cargo(&bin.join("cargo"), &root.join("target"), &artifact);

        let host = linux_host(&root.join("build/lib"));
        let mut ctx = context(vec![ext.clone()], host.clone());
        ctx.cargo = "cross".to_string();
        let path = std::env::var("PATH").unwrap_or_default();
        ctx.base_env.insert("PATH".to_string(), format!("{}:{path}", bin.display()));

        let modules = ctx.build_extension(&ext, &ResolvedTarget::default()).unwrap();
        assert_eq!(
            modules,
            vec![BuiltModule {
                module_name: "hello.rust".to_string(),
                path: artifact,
            }]
        );
        let dest = Installer::new(&host).dylib_ext_path(&ext, &ext.name);
        assert_eq!(ctx.run().unwrap(), vec![dest.clone()]);
        assert_eq!(fs::read(&dest).unwrap(), b"library");
    }

    #[test]
    fn test_optional_failure_continues() {
        let ctx = context(
            vec![missing("first", true), missing("second", false)],
            linux_host(Path::new("/build/lib")),
        );
        let err = ctx.run().unwrap_err();
        assert_eq!(
            missing_manifest(&err),
            Some(Path::new("/definitely/missing/second/Cargo.toml"))
        );
    }

    #[test]
    fn test_required_failure_aborts() {
        let ctx = context(
            vec![missing("first", false), missing("second", true)],
            linux_host(Path::new("/build/lib")),
        );
        let err = ctx.run().unwrap_err();
        assert_eq!(
            missing_manifest(&err),
            Some(Path::new("/definitely/missing/first/Cargo.toml"))
        );
    }

    #[test]
    fn test_all_optional_failures_succeed() {
        let ctx = context(
            vec![missing("first", true), missing("second", true)],
            linux_host(Path::new("/build/lib")),
        );
        assert_eq!(ctx.run().unwrap(), Vec::<PathBuf>::new());
    }

    #[test]
    fn test_missing_rustc_with_only_optional_extensions() {
        let mut ctx = context(vec![missing("first", true)], linux_host(Path::new("/build/lib")));
        ctx.toolchain = Box::new(crate::toolchain::RustcInfo::new("/definitely/not/rustc"));
        assert!(ctx.run().unwrap().is_empty());

        ctx.extensions[0].optional = false;
        let err = ctx.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ToolchainMissing { .. })
        ));
    }

    #[test]
    fn test_version_requirement() {
        let ext = RustExtension {
            rust_version: Some(semver::VersionReq::parse(">=99.0").unwrap()),
            ..missing("first", false)
        };
        let ctx = context(vec![ext], linux_host(Path::new("/build/lib")));
        let err = ctx.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_run_extensions_order() {
        let extensions = vec![
            RustExtension::new("a"),
            RustExtension {
                optional: true,
                ..RustExtension::new("b")
            },
            RustExtension::new("c"),
        ];
        let toolchain = FakeToolchain::new(&[]);
        let mut seen = Vec::new();
        run_extensions("check", &extensions, &toolchain, &EnvVars::new(), |ext| {
            seen.push(ext.name.clone());
            if ext.name == "b" {
                anyhow::bail!("boom");
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_is_debug_build() {
        let ext = RustExtension::new("hello.rust");
        let host = linux_host(Path::new("/build/lib"));
        assert!(!context(vec![], host.clone()).is_debug_build(&ext));

        let inplace = SysconfigHost {
            inplace: true,
            ..host.clone()
        };
        assert!(context(vec![], inplace.clone()).is_debug_build(&ext));

        let release_ext = RustExtension {
            debug: Some(false),
            ..ext.clone()
        };
        assert!(!context(vec![], inplace.clone()).is_debug_build(&release_ext));

        let forced_debug = SysconfigHost {
            debug: Some(true),
            ..host.clone()
        };
        assert!(context(vec![], forced_debug).is_debug_build(&release_ext));

        let release = SysconfigHost {
            release: true,
            debug: Some(true),
            ..inplace
        };
        assert!(!context(vec![], release).is_debug_build(&ext));
    }
}
