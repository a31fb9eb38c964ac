//! Run with --help for usage information

use anyhow::Result;
use clap::{Parser, Subcommand};
use pyext_build::{
    check_extensions, clean_extensions, hooks, BuildOptions, EnvVars, MetadataCache,
    ProjectOptions, RustcInfo,
};
use std::env;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, name = env!("CARGO_PKG_NAME"), display_order = 1)]
/// Build Rust extension modules and executables for a Python package
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the extensions and install them into the build directory
    #[command(name = "build")]
    Build {
        #[command(flatten)]
        build: BuildOptions,
    },
    /// Run `cargo clean` for every extension
    #[command(name = "clean")]
    Clean {
        #[command(flatten)]
        project: ProjectOptions,
    },
    /// Type check every extension with `cargo check`
    #[command(name = "check")]
    Check {
        #[command(flatten)]
        project: ProjectOptions,
    },
    /// Print the console script entry points of script executables
    #[command(name = "entry-points")]
    EntryPoints {
        #[command(flatten)]
        project: ProjectOptions,
    },
    /// Print the files a source distribution needs to rebuild the extensions
    #[command(name = "sdist-files")]
    SdistFiles {
        #[command(flatten)]
        project: ProjectOptions,
    },
}

fn cargo() -> String {
    env::var("CARGO").unwrap_or_else(|_| "cargo".to_string())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    debug!(?cli, "Parsed arguments");

    match cli.command {
        Command::Build { build } => {
            let context = build.into_build_context().build()?;
            for path in context.run()? {
                debug!(path = %path.display(), "Installed");
            }
        }
        Command::Clean { project } => {
            clean_extensions(
                &project.extensions()?,
                &RustcInfo::default(),
                &cargo(),
                &EnvVars::new(),
            )?;
        }
        Command::Check { project } => {
            check_extensions(
                &project.extensions()?,
                &RustcInfo::default(),
                &MetadataCache::new(),
                &cargo(),
                &EnvVars::new(),
            )?;
        }
        Command::EntryPoints { project } => {
            for entry_point in hooks::console_scripts(Vec::new(), &project.extensions()?)? {
                println!("{entry_point}");
            }
        }
        Command::SdistFiles { project } => {
            for path in hooks::extra_source_files(&project.extensions()?)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("💥 {} failed", env!("CARGO_PKG_NAME"));
        for cause in e.chain() {
            eprintln!("  Caused by: {cause}");
        }
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
