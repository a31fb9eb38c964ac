//! What the build needs to know from the python packaging tool driving it.

use crate::bridge::WheelLimitedApi;
use std::path::{Path, PathBuf};

/// The packaging tool's side of a build: flags of the current build phase and
/// its naming conventions for installed files.
pub trait PackagingHost {
    /// Platform the wheel is built for, e.g. `linux-x86_64` or `macosx-11.0-arm64`
    fn plat_name(&self) -> &str;
    /// Platform of the running interpreter, `sysconfig.get_platform()`
    fn host_platform(&self) -> &str;
    /// Whether extensions go next to the sources (editable installs)
    fn inplace(&self) -> bool;
    /// `--debug` of the current run, if given
    fn debug(&self) -> Option<bool>;
    /// `--release` of the current run
    fn release(&self) -> bool;
    /// Where the packaging tool would put the compiled module `module_name`
    fn get_ext_fullpath(&self, module_name: &str) -> PathBuf;
    /// `EXT_SUFFIX`, e.g. `.cpython-311-x86_64-linux-gnu.so`
    fn ext_suffix(&self) -> &str;
    /// The limited API extension suffix, e.g. `.abi3.so`
    fn abi3_suffix(&self) -> Option<&str>;
    /// `EXE`, the executable suffix
    fn exe_suffix(&self) -> &str;
    /// Root of the build directory that becomes the wheel
    fn build_lib(&self) -> &Path;
    /// `<name>-<version>.data` directory name inside the wheel
    fn data_dir(&self) -> &str;
    /// The limited API setting of the wheel being built
    fn py_limited_api(&self) -> &WheelLimitedApi;
}

/// A [PackagingHost] backed by an interpreter's sysconfig and our own options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysconfigHost {
    pub plat_name: String,
    pub host_platform: String,
    pub inplace: bool,
    pub debug: Option<bool>,
    pub release: bool,
    pub ext_suffix: String,
    pub abi3_suffix: Option<String>,
    pub exe_suffix: String,
    pub build_lib: PathBuf,
    /// Directory that in-place builds install relative to
    pub project_root: PathBuf,
    pub data_dir: String,
    pub py_limited_api: WheelLimitedApi,
}

impl PackagingHost for SysconfigHost {
    fn plat_name(&self) -> &str {
        &self.plat_name
    }

    fn host_platform(&self) -> &str {
        &self.host_platform
    }

    fn inplace(&self) -> bool {
        self.inplace
    }

    fn debug(&self) -> Option<bool> {
        self.debug
    }

    fn release(&self) -> bool {
        self.release
    }

    /// `hello.rust` -> `<build_lib>/hello/rust<EXT_SUFFIX>`, or relative to the
    /// project root for in-place builds
    fn get_ext_fullpath(&self, module_name: &str) -> PathBuf {
        let mut parts: Vec<&str> = module_name.split('.').collect();
        let name = parts.pop().unwrap_or_default();
        let base = if self.inplace {
            &self.project_root
        } else {
            &self.build_lib
        };
        let mut path = base.clone();
        path.extend(parts);
        path.push(format!("{name}{}", self.ext_suffix));
        path
    }

    fn ext_suffix(&self) -> &str {
        &self.ext_suffix
    }

    fn abi3_suffix(&self) -> Option<&str> {
        self.abi3_suffix.as_deref()
    }

    fn exe_suffix(&self) -> &str {
        &self.exe_suffix
    }

    fn build_lib(&self) -> &Path {
        &self.build_lib
    }

    fn data_dir(&self) -> &str {
        &self.data_dir
    }

    fn py_limited_api(&self) -> &WheelLimitedApi {
        &self.py_limited_api
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn linux_host(build_lib: &Path) -> SysconfigHost {
        SysconfigHost {
            plat_name: "linux-x86_64".to_string(),
            host_platform: "linux-x86_64".to_string(),
            inplace: false,
            debug: None,
            release: false,
            ext_suffix: ".cpython-311-x86_64-linux-gnu.so".to_string(),
            abi3_suffix: Some(".abi3.so".to_string()),
            exe_suffix: String::new(),
            build_lib: build_lib.to_path_buf(),
            project_root: build_lib.join("project"),
            data_dir: "hello-0.1.0.data".to_string(),
            py_limited_api: WheelLimitedApi::Disabled,
        }
    }

    #[test]
    fn test_get_ext_fullpath() {
        let host = linux_host(Path::new("/build/lib"));
        assert_eq!(
            host.get_ext_fullpath("hello.rust"),
            PathBuf::from("/build/lib/hello/rust.cpython-311-x86_64-linux-gnu.so")
        );
        assert_eq!(
            host.get_ext_fullpath("toplevel"),
            PathBuf::from("/build/lib/toplevel.cpython-311-x86_64-linux-gnu.so")
        );
        let host = SysconfigHost {
            inplace: true,
            ..host
        };
        assert_eq!(
            host.get_ext_fullpath("hello.rust"),
            PathBuf::from("/build/lib/project/hello/rust.cpython-311-x86_64-linux-gnu.so")
        );
    }
}
