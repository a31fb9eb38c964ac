use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variables set on top of the inherited process environment.
///
/// Ordered so it can serve as a cache key fingerprint.
pub type EnvVars = BTreeMap<String, String>;

/// Renders a command line the way a user would type it, quoting arguments
/// that contain whitespace.
pub(crate) fn format_command_line<I, S>(program: impl AsRef<OsStr>, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    std::iter::once(program.as_ref().to_string_lossy().into_owned())
        .chain(
            args.into_iter()
                .map(|arg| arg.as_ref().to_string_lossy().into_owned()),
        )
        .map(|arg| quote_whitespace(&arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Same as [format_command_line] for an already assembled [Command]
pub(crate) fn display_command(command: &Command) -> String {
    format_command_line(command.get_program(), command.get_args())
}

fn quote_whitespace(arg: &str) -> String {
    if arg.contains(' ') {
        format!("'{arg}'")
    } else {
        arg.to_string()
    }
}

/// Splits `foo/bar.cpython-38-x86_64-linux-gnu.so` into
/// `("foo/bar", ".cpython-38-x86_64-linux-gnu", ".so")`.
pub(crate) fn split_platform_and_extension(path: &Path) -> (PathBuf, String, String) {
    let (rest, extension) = split_extension(path);
    let (base, platform_tag) = split_extension(&rest);
    (base, platform_tag, extension)
}

/// `os.path.splitext` semantics: a leading dot of the file name is not an extension.
fn split_extension(path: &Path) -> (PathBuf, String) {
    let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return (path.to_path_buf(), String::new());
    };
    match file_name.rfind('.') {
        Some(index) if index > 0 => {
            let (stem, extension) = file_name.split_at(index);
            (path.with_file_name(stem), extension.to_string())
        }
        _ => (path.to_path_buf(), String::new()),
    }
}

/// Appends a raw suffix such as `.exe` or `.so` to the file name of `path`
pub(crate) fn append_to_file_name(path: &Path, suffix: &str) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(suffix);
    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_command_line() {
        assert_eq!(format_command_line("ls", ["-la"]), "ls -la");
        assert_eq!(
            format_command_line("cargo", ["foo bar", "--release"]),
            "cargo 'foo bar' --release"
        );
        assert_eq!(format_command_line("cargo", Vec::<String>::new()), "cargo");
    }

    #[test]
    fn test_split_platform_and_extension() {
        assert_eq!(
            split_platform_and_extension(Path::new("foo/bar.platform.so")),
            (
                PathBuf::from("foo/bar"),
                ".platform".to_string(),
                ".so".to_string()
            )
        );
        assert_eq!(
            split_platform_and_extension(Path::new("build/hello.pyd")),
            (PathBuf::from("build/hello"), String::new(), ".pyd".to_string())
        );
    }

    #[test]
    fn test_append_to_file_name() {
        assert_eq!(
            append_to_file_name(Path::new("scripts/hello"), ".exe"),
            PathBuf::from("scripts/hello.exe")
        );
    }
}
