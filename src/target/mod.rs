//! Decides which Rust target to build for.
//!
//! The interpreter we build for is not necessarily native to the machine:
//! a 32-bit Python on 64-bit Windows, an Intel Python on Apple silicon, a
//! `universal2` build driven by `ARCHFLAGS` or a cross-compiled interpreter
//! on Linux all need an explicit `--target`.

mod plat_name;

pub use plat_name::{linux_plat_arch, strips_platform_tag};

use crate::toolchain::Toolchain;
use crate::util::EnvVars;
use crate::BuildError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use target_lexicon::{Triple, Vendor};
use tracing::{debug, instrument};

/// The aarch64 half of a universal2 build
pub const UNIVERSAL2_ARM64: &str = "aarch64-apple-darwin";
/// The x86_64 half of a universal2 build
pub const UNIVERSAL2_X86_64: &str = "x86_64-apple-darwin";

/// A Rust target triple or the virtual `universal2-apple-darwin` triple.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub enum TargetTriple {
    /// Build a fat binary of `aarch64-apple-darwin` and `x86_64-apple-darwin`.
    Universal2,
    /// Any target triple supported by Rust, passed verbatim to Cargo.
    Regular(String),
}

impl FromStr for TargetTriple {
    type Err = String;

    fn from_str(triple: &str) -> std::result::Result<Self, Self::Err> {
        match triple {
            "universal2-apple-darwin" => Ok(TargetTriple::Universal2),
            triple => Ok(TargetTriple::Regular(triple.to_string())),
        }
    }
}

/// A single cargo target and how to link for it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// `None` builds for cargo's default target
    pub triple: Option<String>,
    /// Exported as `PYO3_CROSS_LIB_DIR`
    pub cross_lib: Option<PathBuf>,
    /// Passed as `-C linker=...`
    pub linker: Option<String>,
}

impl ResolvedTarget {
    /// A target passed explicitly with nothing else to configure
    pub fn triple(triple: impl Into<String>) -> Self {
        Self {
            triple: Some(triple.into()),
            ..Self::default()
        }
    }
}

/// The shape of the build: one cargo invocation or two merged into a fat binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Single(ResolvedTarget),
    Universal2,
}

/// Build configuration of the interpreter, as reported by its `sysconfig`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterpreterBuildConfig {
    /// `HOST_GNU_TYPE`, the platform the interpreter runs on
    pub host_gnu_type: Option<String>,
    /// `BUILD_GNU_TYPE`, the platform the interpreter was built on
    pub build_gnu_type: Option<String>,
    /// `BLDSHARED`, the command used to link extension modules
    pub bldshared: Option<String>,
    /// `sysconfig.get_path("stdlib")`
    pub stdlib: Option<PathBuf>,
}

/// A cross-compiled interpreter detected from its build configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossCompileInfo {
    pub host_type: String,
    pub cross_lib: Option<PathBuf>,
    pub linker: Option<String>,
}

impl CrossCompileInfo {
    /// Returns `None` unless the interpreter was built for another platform than it was built on
    pub fn detect(config: &InterpreterBuildConfig) -> Option<Self> {
        let host_type = config.host_gnu_type.as_deref().filter(|host| !host.is_empty())?;
        let build_type = config.build_gnu_type.as_deref();
        if Some(host_type) == build_type {
            return None;
        }
        // An arm64 python built on x86_64 macOS, not a cross build we can handle
        if host_type.contains("apple-darwin")
            && build_type.is_some_and(|build| build.contains("apple-darwin"))
        {
            return None;
        }
        Some(Self {
            host_type: host_type.to_string(),
            cross_lib: config
                .stdlib
                .as_ref()
                .and_then(|stdlib| stdlib.parent())
                .map(PathBuf::from),
            linker: config
                .bldshared
                .as_deref()
                .and_then(|bldshared| bldshared.split_whitespace().next())
                .map(ToString::to_string),
        })
    }

    /// The rust triple for `HOST_GNU_TYPE`, trying the vendor `unknown` form as well
    pub fn rust_target(&self, known_targets: &[String]) -> Option<String> {
        if known_targets.iter().any(|target| *target == self.host_type) {
            return Some(self.host_type.clone());
        }
        let without_vendor = replace_vendor_with_unknown(&self.host_type)?;
        known_targets
            .iter()
            .any(|target| *target == without_vendor)
            .then_some(without_vendor)
    }
}

/// `x86_64-pc-linux-gnu` -> `x86_64-unknown-linux-gnu`
fn replace_vendor_with_unknown(triple: &str) -> Option<String> {
    let mut parsed = Triple::from_str(triple).ok()?;
    parsed.vendor = Vendor::Unknown;
    Some(parsed.to_string())
}

/// Everything besides the platform name that influences the target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossSignals {
    /// `ARCHFLAGS`, e.g. `-arch x86_64 -arch arm64`
    pub arch_flags: Option<String>,
    /// Machine architecture of the running process, as in `platform.machine()`
    pub machine: String,
    /// Build configuration of the target interpreter
    pub interpreter: InterpreterBuildConfig,
}

impl CrossSignals {
    /// Reads `ARCHFLAGS` from the environment
    pub fn from_env(machine: impl Into<String>, interpreter: InterpreterBuildConfig) -> Self {
        Self {
            arch_flags: env::var("ARCHFLAGS").ok().filter(|flags| !flags.is_empty()),
            machine: machine.into(),
            interpreter,
        }
    }

    /// The architectures named by `-arch <arch>` in `ARCHFLAGS`, other flags are skipped
    fn arches(&self) -> HashSet<&str> {
        let mut words = self.arch_flags.as_deref().unwrap_or_default().split_whitespace();
        let mut arches = HashSet::new();
        while let Some(word) = words.next() {
            if word == "-arch" {
                arches.extend(words.next());
            }
        }
        arches
    }
}

/// Decides the target for building against an interpreter on `plat_name`.
///
/// In order of precedence: universal2 from `ARCHFLAGS`, an explicit target,
/// a single `ARCHFLAGS` architecture, a cross-compiled interpreter, the
/// Windows ABI of rustc's default target and an x86_64 process on macOS.
#[instrument(skip_all, fields(plat_name = plat_name))]
pub fn resolve_target(
    plat_name: &str,
    explicit: Option<&TargetTriple>,
    signals: &CrossSignals,
    toolchain: &dyn Toolchain,
    env: &EnvVars,
) -> Result<TargetSpec> {
    let is_macos = plat_name.starts_with("macosx-");
    let arches = signals.arches();
    let (x86_64, arm64) = (arches.contains("x86_64"), arches.contains("arm64"));

    if is_macos && x86_64 && arm64 {
        if let Some(TargetTriple::Regular(triple)) = explicit {
            eprintln!(
                "⚠️  Warning: ARCHFLAGS requests a universal2 build, ignoring the explicit target {triple}"
            );
        }
        debug!("Building universal2 from ARCHFLAGS");
        return Ok(TargetSpec::Universal2);
    }

    let cross = CrossCompileInfo::detect(&signals.interpreter);

    match explicit {
        Some(TargetTriple::Universal2) => return Ok(TargetSpec::Universal2),
        Some(TargetTriple::Regular(triple)) => {
            let mut resolved = ResolvedTarget::triple(triple.clone());
            if let Some(cross) = cross {
                match cross.rust_target(&toolchain.target_list(env)?) {
                    Some(cross_target) if cross_target != *triple => eprintln!(
                        "⚠️  Warning: Forced Rust target `{triple}` but `{cross_target}` is the cross compile target of the python interpreter"
                    ),
                    None => eprintln!(
                        "⚠️  Warning: Forced Rust target `{triple}` but the python interpreter is cross compiled for `{}`",
                        cross.host_type
                    ),
                    Some(_) => {}
                }
                resolved.cross_lib = cross.cross_lib;
                resolved.linker = cross.linker;
            }
            return Ok(TargetSpec::Single(resolved));
        }
        None => {}
    }

    if is_macos {
        if arm64 {
            return Ok(TargetSpec::Single(ResolvedTarget::triple(UNIVERSAL2_ARM64)));
        }
        if x86_64 {
            return Ok(TargetSpec::Single(ResolvedTarget::triple(UNIVERSAL2_X86_64)));
        }
    }

    if let Some(cross) = cross {
        let triple = cross
            .rust_target(&toolchain.target_list(env)?)
            .ok_or_else(|| {
                BuildError::PlatformError(format!(
                    "Don't know the Rust target for {}",
                    cross.host_type
                ))
            })?;
        debug!(%triple, "Cross compiling for the python interpreter's host");
        return Ok(TargetSpec::Single(ResolvedTarget {
            triple: Some(triple),
            cross_lib: cross.cross_lib,
            linker: cross.linker,
        }));
    }

    let triple = local_target(plat_name, &signals.machine, toolchain, env)?;
    Ok(TargetSpec::Single(ResolvedTarget {
        triple,
        ..ResolvedTarget::default()
    }))
}

/// The target to force so that the build matches the interpreter rather than the machine
fn local_target(
    plat_name: &str,
    machine: &str,
    toolchain: &dyn Toolchain,
    env: &EnvVars,
) -> Result<Option<String>> {
    let windows_arch = match plat_name {
        "win32" => Some("i686"),
        "win-amd64" => Some("x86_64"),
        _ => None,
    };
    if let Some(arch) = windows_arch {
        let abi = match toolchain.cfgs(None, env)?.get("target_env") {
            Some("gnu") => "gnu",
            _ => "msvc",
        };
        return Ok(Some(format!("{arch}-pc-windows-{abi}")));
    }
    if plat_name.starts_with("macosx-") && machine == "x86_64" {
        return Ok(Some(UNIVERSAL2_X86_64.to_string()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::tests::FakeToolchain;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn signals(arch_flags: Option<&str>, machine: &str) -> CrossSignals {
        CrossSignals {
            arch_flags: arch_flags.map(ToString::to_string),
            machine: machine.to_string(),
            interpreter: InterpreterBuildConfig::default(),
        }
    }

    fn cross_interpreter() -> InterpreterBuildConfig {
        InterpreterBuildConfig {
            host_gnu_type: Some("aarch64-linux-gnu".to_string()),
            build_gnu_type: Some("x86_64-pc-linux-gnu".to_string()),
            bldshared: Some("aarch64-linux-gnu-gcc -shared -Wl,-O1".to_string()),
            stdlib: Some(PathBuf::from("/opt/sysroot/usr/lib/python3.11")),
        }
    }

    fn single(triple: &str) -> TargetSpec {
        TargetSpec::Single(ResolvedTarget::triple(triple))
    }

    #[rstest]
    #[case("win32", "msvc", "i686-pc-windows-msvc")]
    #[case("win-amd64", "msvc", "x86_64-pc-windows-msvc")]
    #[case("win32", "gnu", "i686-pc-windows-gnu")]
    #[case("win-amd64", "gnu", "x86_64-pc-windows-gnu")]
    fn test_windows_abi(#[case] plat_name: &str, #[case] target_env: &str, #[case] expected: &str) {
        let toolchain = FakeToolchain::new(&[("target_env", target_env)]);
        let resolved = resolve_target(
            plat_name,
            None,
            &signals(None, "AMD64"),
            &toolchain,
            &EnvVars::new(),
        )
        .unwrap();
        assert_eq!(resolved, single(expected));
    }

    #[test]
    fn test_macos_intel_under_arm() {
        let toolchain = FakeToolchain::new(&[("target_os", "macos")]);
        let resolved = resolve_target(
            "macosx-11.0-x86_64",
            None,
            &signals(None, "x86_64"),
            &toolchain,
            &EnvVars::new(),
        )
        .unwrap();
        assert_eq!(resolved, single("x86_64-apple-darwin"));
        // Native arm64 process needs no explicit target
        let resolved = resolve_target(
            "macosx-11.0-arm64",
            None,
            &signals(None, "arm64"),
            &toolchain,
            &EnvVars::new(),
        )
        .unwrap();
        assert_eq!(resolved, TargetSpec::Single(ResolvedTarget::default()));
    }

    #[rstest]
    #[case(None, "-arch x86_64 -arch arm64")]
    #[case(
        Some(TargetTriple::Regular("x86_64-apple-darwin".to_string())),
        "-arch x86_64 -arch arm64"
    )]
    #[case(Some(TargetTriple::Universal2), "-arch x86_64 -arch arm64")]
    #[case(None, "-arch arm64 -arch x86_64")]
    #[case(None, "-arch arm64 -arch x86_64 -mmacosx-version-min=11.0")]
    #[case(None, "-isysroot /sdk  -arch x86_64\t-arch arm64 -O2")]
    fn test_universal2_precedence(
        #[case] explicit: Option<TargetTriple>,
        #[case] arch_flags: &str,
    ) {
        let toolchain = FakeToolchain::new(&[]);
        let resolved = resolve_target(
            "macosx-10.9-universal2",
            explicit.as_ref(),
            &signals(Some(arch_flags), "arm64"),
            &toolchain,
            &EnvVars::new(),
        )
        .unwrap();
        assert_eq!(resolved, TargetSpec::Universal2);
    }

    #[rstest]
    #[case("-arch arm64", "aarch64-apple-darwin")]
    #[case("-arch x86_64", "x86_64-apple-darwin")]
    #[case("-arch arm64 -mmacosx-version-min=11.0", "aarch64-apple-darwin")]
    #[case("-O2 -arch x86_64 -g", "x86_64-apple-darwin")]
    fn test_single_archflags(#[case] arch_flags: &str, #[case] expected: &str) {
        let toolchain = FakeToolchain::new(&[]);
        let resolved = resolve_target(
            "macosx-11.0-arm64",
            None,
            &signals(Some(arch_flags), "arm64"),
            &toolchain,
            &EnvVars::new(),
        )
        .unwrap();
        assert_eq!(resolved, single(expected));
    }

    #[rstest]
    #[case("win32", None, "AMD64")]
    #[case("macosx-11.0-x86_64", Some("-arch arm64"), "x86_64")]
    #[case("linux-x86_64", None, "x86_64")]
    fn test_explicit_override_wins(
        #[case] plat_name: &str,
        #[case] arch_flags: Option<&str>,
        #[case] machine: &str,
    ) {
        let toolchain = FakeToolchain::new(&[("target_env", "gnu")]);
        let explicit = TargetTriple::Regular("wasm32-unknown-emscripten".to_string());
        let resolved = resolve_target(
            plat_name,
            Some(&explicit),
            &signals(arch_flags, machine),
            &toolchain,
            &EnvVars::new(),
        )
        .unwrap();
        assert_eq!(resolved, single("wasm32-unknown-emscripten"));
    }

    #[test]
    fn test_posix_cross_compile() {
        let toolchain = FakeToolchain::new(&[]);
        let signals = CrossSignals {
            interpreter: cross_interpreter(),
            ..signals(None, "x86_64")
        };
        let resolved =
            resolve_target("linux-aarch64", None, &signals, &toolchain, &EnvVars::new()).unwrap();
        assert_eq!(
            resolved,
            TargetSpec::Single(ResolvedTarget {
                triple: Some("aarch64-unknown-linux-gnu".to_string()),
                cross_lib: Some(PathBuf::from("/opt/sysroot/usr/lib")),
                linker: Some("aarch64-linux-gnu-gcc".to_string()),
            })
        );
    }

    #[test]
    fn test_posix_cross_compile_beats_windows_and_macos() {
        let toolchain = FakeToolchain::new(&[("target_env", "gnu")]);
        let signals = CrossSignals {
            interpreter: cross_interpreter(),
            ..signals(None, "x86_64")
        };
        let resolved =
            resolve_target("win-amd64", None, &signals, &toolchain, &EnvVars::new()).unwrap();
        assert_eq!(
            resolved,
            TargetSpec::Single(ResolvedTarget {
                triple: Some("aarch64-unknown-linux-gnu".to_string()),
                cross_lib: Some(PathBuf::from("/opt/sysroot/usr/lib")),
                linker: Some("aarch64-linux-gnu-gcc".to_string()),
            })
        );
    }

    #[test]
    fn test_posix_cross_compile_unknown_target() {
        let toolchain = FakeToolchain::new(&[]);
        let signals = CrossSignals {
            interpreter: InterpreterBuildConfig {
                host_gnu_type: Some("sparc-sun-solaris2.10".to_string()),
                ..cross_interpreter()
            },
            ..signals(None, "x86_64")
        };
        let err = resolve_target("linux-sparc", None, &signals, &toolchain, &EnvVars::new())
            .unwrap_err();
        insta::assert_snapshot!(err, @"Don't know the Rust target for sparc-sun-solaris2.10");
    }

    #[test]
    fn test_not_cross_compiling() {
        let same = InterpreterBuildConfig {
            host_gnu_type: Some("x86_64-pc-linux-gnu".to_string()),
            build_gnu_type: Some("x86_64-pc-linux-gnu".to_string()),
            ..InterpreterBuildConfig::default()
        };
        assert_eq!(CrossCompileInfo::detect(&same), None);
        let darwin = InterpreterBuildConfig {
            host_gnu_type: Some("aarch64-apple-darwin20".to_string()),
            build_gnu_type: Some("x86_64-apple-darwin19".to_string()),
            ..InterpreterBuildConfig::default()
        };
        assert_eq!(CrossCompileInfo::detect(&darwin), None);
        assert_eq!(CrossCompileInfo::detect(&InterpreterBuildConfig::default()), None);
    }

    #[test]
    fn test_determinism() {
        let toolchain = FakeToolchain::new(&[("target_env", "msvc")]);
        let signals = signals(Some(""), "AMD64");
        let first = resolve_target("win32", None, &signals, &toolchain, &EnvVars::new()).unwrap();
        for _ in 0..5 {
            let again =
                resolve_target("win32", None, &signals, &toolchain, &EnvVars::new()).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_target_triple_from_str() {
        assert_eq!(
            "universal2-apple-darwin".parse::<TargetTriple>(),
            Ok(TargetTriple::Universal2)
        );
        assert_eq!(
            "x86_64-unknown-linux-musl".parse::<TargetTriple>(),
            Ok(TargetTriple::Regular("x86_64-unknown-linux-musl".to_string()))
        );
    }

    #[test]
    fn test_replace_vendor_with_unknown() {
        assert_eq!(
            replace_vendor_with_unknown("x86_64-pc-linux-gnu").as_deref(),
            Some("x86_64-unknown-linux-gnu")
        );
        assert_eq!(replace_vendor_with_unknown("not a triple"), None);
    }
}
