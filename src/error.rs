use std::path::PathBuf;
use thiserror::Error;

/// The ways building a single Rust extension can fail.
///
/// Functions in this crate return [`anyhow::Result`]; these errors are the
/// typed root causes and can be recovered with `downcast_ref::<BuildError>()`.
#[derive(Debug, Error)]
pub enum BuildError {
    /// `cargo` or `rustc` could not be executed at all
    #[error(
        "Unable to execute `{program}` - this package requires Rust to be installed and {program} to be on the PATH"
    )]
    ToolchainMissing {
        /// The program that could not be started
        program: String,
    },
    /// The Rust toolchain ran and exited with a failure
    #[error("{0}")]
    CompileError(String),
    /// The declared `Cargo.toml` does not exist
    #[error("can't find Rust extension project file: {}", .0.display())]
    ManifestMissing(PathBuf),
    /// `cargo metadata` resolved to a workspace root without a package
    #[error(
        "{} is a virtual manifest; point the extension at the Cargo.toml of a package instead",
        .0.display()
    )]
    VirtualManifest(PathBuf),
    /// The build succeeded but did not produce the expected artifact
    #[error("Rust build failed; {0}")]
    ArtifactNotFound(String),
    /// The build produced more than one candidate library
    #[error("Rust build failed; expected only one cdylib or dylib build artifact but found {0:?}")]
    AmbiguousArtifact(Vec<String>),
    /// The detected rustc does not satisfy the extension's `rust-version`
    #[error("Rust {found} does not match extension requirement {required}")]
    VersionMismatch {
        /// Version of the detected compiler
        found: semver::Version,
        /// Requirement declared by the extension
        required: semver::VersionReq,
    },
    /// Target or platform information could not be determined
    #[error("{0}")]
    PlatformError(String),
    /// The extension description is malformed
    #[error("{0}")]
    InvalidConfig(String),
}
