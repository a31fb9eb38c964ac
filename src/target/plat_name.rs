//! Helpers for distutils style platform names such as `linux-x86_64`,
//! `manylinux_2_24_armv7l` or `macosx-11.0-arm64`.

/// The architecture of a `linux` or `manylinux` platform name.
///
/// The glibc version of `manylinux_2_24_armv7l` is skipped, so this returns `armv7l`.
/// Other platforms return `None`.
pub fn linux_plat_arch(plat_name: &str) -> Option<String> {
    let plat_name = plat_name.to_lowercase().replace(['-', '.'], "_");
    if !(plat_name.starts_with("linux") || plat_name.starts_with("manylinux")) {
        return None;
    }
    let mut arch_found = false;
    let arch = plat_name
        .split('_')
        .filter(|item| {
            if item.starts_with("linux") || item.starts_with("manylinux") {
                return false;
            }
            if !arch_found && item.chars().all(|c| c.is_ascii_digit()) && !item.is_empty() {
                return false;
            }
            arch_found = true;
            true
        })
        .collect::<Vec<_>>()
        .join("_");
    (!arch.is_empty()).then_some(arch)
}

/// Whether the platform tag in an extension's file name must be dropped.
///
/// When cross compiling for another linux architecture, the interpreter running
/// the build would name the file after its own architecture, e.g.
/// `rust.cpython-311-x86_64-linux-gnu.so` for an aarch64 wheel. Limited API
/// suffixes (`.abi3.so`) carry no architecture and are kept.
pub fn strips_platform_tag(ext_path: &str, plat_name: &str, host_platform: &str) -> bool {
    if ext_path.contains(".abi3.") {
        return false;
    }
    let Some(target_arch) = linux_plat_arch(plat_name) else {
        return false;
    };
    let host_arch = host_platform
        .rsplit_once('-')
        .map_or(host_platform, |(_, arch)| arch);
    host_arch != target_arch
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("linux-x86_64", Some("x86_64"))]
    #[case("linux_i686", Some("i686"))]
    #[case("manylinux2014_aarch64", Some("aarch64"))]
    #[case("manylinux_2_24_armv7l", Some("armv7l"))]
    #[case("manylinux_2_17_x86_64", Some("x86_64"))]
    #[case("macosx-11.0-arm64", None)]
    #[case("win-amd64", None)]
    fn test_linux_plat_arch(#[case] plat_name: &str, #[case] expected: Option<&str>) {
        assert_eq!(linux_plat_arch(plat_name).as_deref(), expected);
    }

    #[test]
    fn test_strips_platform_tag() {
        let ext = "build/lib/hello/rust.cpython-311-x86_64-linux-gnu.so";
        assert!(strips_platform_tag(ext, "linux-aarch64", "linux-x86_64"));
        assert!(!strips_platform_tag(ext, "linux-x86_64", "linux-x86_64"));
        assert!(!strips_platform_tag(ext, "macosx-11.0-arm64", "macosx-11.0-x86_64"));
        assert!(!strips_platform_tag(
            "build/lib/hello/rust.abi3.so",
            "linux-aarch64",
            "linux-x86_64"
        ));
    }
}
