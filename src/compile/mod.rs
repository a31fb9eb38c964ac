//! Running cargo: assembling the invocation, reading its JSON messages and
//! merging universal2 builds.

mod artifacts;
mod command;
mod universal2;

pub use artifacts::{
    find_cargo_artifacts, replace_cross_target_dir, run_cargo, select_executables,
    select_library_artifact, BuiltModule,
};
pub use command::{build_command, CargoBuildSettings, CargoCommand};
pub use universal2::{create_universal2_binary, merge_universal2, universal2_path};
