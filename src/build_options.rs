use crate::bridge::WheelLimitedApi;
use crate::build_context::BuildContextBuilder;
use crate::pyproject_toml::{project_root, PyProjectToml};
use crate::target::TargetTriple;
use crate::RustExtension;
use anyhow::Result;
use std::path::PathBuf;
use tracing::instrument;

mod heading {
    pub const COMPILATION_OPTIONS: &str = "Compilation Options";
    pub const OUTPUT_OPTIONS: &str = "Output Options";
    pub const PYTHON_OPTIONS: &str = "Python Options";
}

/// Where the project lives
#[derive(Debug, clap::Parser, Clone, Eq, PartialEq)]
pub struct ProjectOptions {
    /// Path to the pyproject.toml declaring the Rust extensions
    #[arg(long, value_name = "PATH", default_value = "pyproject.toml")]
    pub pyproject: PathBuf,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            pyproject: PathBuf::from("pyproject.toml"),
        }
    }
}

impl ProjectOptions {
    /// The extensions declared in `pyproject.toml`
    pub fn extensions(&self) -> Result<Vec<RustExtension>> {
        PyProjectToml::new(&self.pyproject)?.extensions(&project_root(&self.pyproject))
    }
}

/// Options of a build run, used both by the CLI and the library API
#[derive(Debug, clap::Parser, Clone, Eq, PartialEq)]
pub struct BuildOptions {
    #[command(flatten)]
    pub project: ProjectOptions,

    /// Build the extensions next to their python sources instead of into the build directory
    #[arg(long, help_heading = heading::OUTPUT_OPTIONS)]
    pub inplace: bool,

    /// Build in debug mode, overriding the extensions' own `debug` setting
    #[arg(long, conflicts_with = "release", help_heading = heading::COMPILATION_OPTIONS)]
    pub debug: bool,

    /// Build in release mode, overriding everything else
    #[arg(long, help_heading = heading::COMPILATION_OPTIONS)]
    pub release: bool,

    /// Pass `-q` to cargo and capture its diagnostics
    #[arg(short = 'q', long, help_heading = heading::COMPILATION_OPTIONS)]
    pub qbuild: bool,

    /// Directory that becomes the wheel's contents
    #[arg(
        long,
        value_name = "DIRECTORY",
        default_value = "build/lib",
        help_heading = heading::OUTPUT_OPTIONS,
    )]
    pub build_lib: PathBuf,

    /// Build for the target triple, `universal2-apple-darwin` builds a fat binary
    #[arg(
        long,
        value_name = "TRIPLE",
        env = "CARGO_BUILD_TARGET",
        help_heading = heading::COMPILATION_OPTIONS,
    )]
    pub target: Option<TargetTriple>,

    /// Platform name of the wheel, defaults to the interpreter's platform
    #[arg(long, value_name = "PLATFORM", help_heading = heading::PYTHON_OPTIONS)]
    pub plat_name: Option<String>,

    /// Build a limited API wheel, e.g. `cp38`
    #[arg(long, value_name = "TAG", help_heading = heading::PYTHON_OPTIONS)]
    pub py_limited_api: Option<WheelLimitedApi>,

    /// The python interpreter to build for
    #[arg(
        short = 'i',
        long,
        value_name = "PYTHON",
        env = "PYO3_PYTHON",
        help_heading = heading::PYTHON_OPTIONS,
    )]
    pub python: Option<PathBuf>,

    /// Build number of the wheel, must start with a digit
    #[arg(long, value_name = "NUMBER", help_heading = heading::OUTPUT_OPTIONS)]
    pub build_number: Option<String>,

    /// Use verbose output (-vv very verbose/build.rs output)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            project: ProjectOptions::default(),
            inplace: false,
            debug: false,
            release: false,
            qbuild: false,
            build_lib: PathBuf::from("build/lib"),
            target: None,
            plat_name: None,
            py_limited_api: None,
            python: None,
            build_number: None,
            verbose: 0,
        }
    }
}

impl BuildOptions {
    /// Tries to fill the missing configuration for a BuildContext by querying python
    #[instrument(skip_all)]
    pub fn into_build_context(self) -> BuildContextBuilder {
        BuildContextBuilder::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_build_options() {
        let options = BuildOptions::try_parse_from([
            "build",
            "--release",
            "--target",
            "universal2-apple-darwin",
            "--py-limited-api",
            "cp38",
            "-vv",
            "--build-number",
            "1",
        ])
        .unwrap();
        assert!(options.release);
        assert_eq!(options.target, Some(TargetTriple::Universal2));
        assert_eq!(
            options.py_limited_api,
            Some(WheelLimitedApi::Version("cp38".to_string()))
        );
        assert_eq!(options.verbose, 2);
        assert_eq!(options.build_lib, PathBuf::from("build/lib"));
        assert_eq!(options.project.pyproject, PathBuf::from("pyproject.toml"));
    }

    #[test]
    fn test_debug_conflicts_with_release() {
        assert!(BuildOptions::try_parse_from(["build", "--debug", "--release"]).is_err());
    }

    #[test]
    fn test_invalid_limited_api() {
        let err = BuildOptions::try_parse_from(["build", "--py-limited-api", "abi3"]).unwrap_err();
        assert!(err.to_string().contains("invalid limited API tag `abi3`"));
    }
}
