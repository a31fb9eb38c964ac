//! Binding models and the cargo features and artifact kinds they imply.
//!
//! Every binding is a closed variant of [`Binding`]; adding one forces every
//! `match` below to be revisited.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Artifact kinds that count as the library of an extension module
pub const LIB_ARTIFACT_KINDS: [&str; 2] = ["cdylib", "dylib"];
/// Artifact kinds that count as executables
pub const BIN_ARTIFACT_KINDS: [&str; 1] = ["bin"];

/// How the Rust code talks to Python
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Binding {
    /// pyo3 extension module
    #[default]
    #[serde(alias = "pyo3")]
    PyO3,
    /// rust-cpython extension module
    #[serde(alias = "rust-cpython")]
    RustCPython,
    /// A plain cdylib exposing a C ABI, no binding crate involved
    #[serde(alias = "no-binding")]
    NoBinding,
    /// A standalone executable
    #[serde(alias = "exec", alias = "bin")]
    Exec,
}

impl Binding {
    /// Whether cargo builds executables rather than a library for this binding
    pub fn uses_exec(self) -> bool {
        match self {
            Binding::Exec => true,
            Binding::PyO3 | Binding::RustCPython | Binding::NoBinding => false,
        }
    }

    /// The `target.kind` values of cargo's `compiler-artifact` messages we collect
    pub fn artifact_kinds(self) -> &'static [&'static str] {
        match self {
            Binding::Exec => &BIN_ARTIFACT_KINDS,
            Binding::PyO3 | Binding::RustCPython | Binding::NoBinding => &LIB_ARTIFACT_KINDS,
        }
    }

    /// Cargo features the binding needs on top of the user's own features
    pub fn features(self, py_limited_api: bool, wheel: &WheelLimitedApi) -> BTreeSet<String> {
        match self {
            Binding::PyO3 => {
                let mut features = BTreeSet::from(["pyo3/extension-module".to_string()]);
                if py_limited_api {
                    match wheel.minor_version() {
                        Some(minor) => features.insert(format!("pyo3/abi3-py3{minor}")),
                        None => features.insert("pyo3/abi3".to_string()),
                    };
                }
                features
            }
            Binding::RustCPython => BTreeSet::from([
                "cpython/python3-sys".to_string(),
                "cpython/extension-module".to_string(),
            ]),
            Binding::NoBinding | Binding::Exec => BTreeSet::new(),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::PyO3 => write!(f, "PyO3"),
            Binding::RustCPython => write!(f, "RustCPython"),
            Binding::NoBinding => write!(f, "NoBinding"),
            Binding::Exec => write!(f, "Exec"),
        }
    }
}

/// Per extension limited API choice
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PyLimitedApi {
    /// Follow the wheel's `py-limited-api` setting
    #[default]
    Auto,
    /// Always build against the limited API
    ForceOn,
    /// Never build against the limited API
    ForceOff,
}

impl PyLimitedApi {
    /// An explicit choice on the extension wins, `auto` defers to the wheel
    pub fn resolve(self, wheel: &WheelLimitedApi) -> bool {
        match self {
            PyLimitedApi::ForceOn => true,
            PyLimitedApi::ForceOff => false,
            PyLimitedApi::Auto => wheel.is_enabled(),
        }
    }
}

impl<'de> Deserialize<'de> for PyLimitedApi {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(true) => Ok(PyLimitedApi::ForceOn),
            Raw::Bool(false) => Ok(PyLimitedApi::ForceOff),
            Raw::Str(value) if value == "auto" => Ok(PyLimitedApi::Auto),
            Raw::Str(value) => Err(serde::de::Error::custom(format!(
                "invalid py-limited-api value `{value}`, expected `auto`, `true` or `false`"
            ))),
        }
    }
}

/// The limited API setting of the wheel being built, e.g. `--py-limited-api cp38`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum WheelLimitedApi {
    /// Not a limited API wheel
    #[default]
    Disabled,
    /// A limited API wheel without a minimum version
    Enabled,
    /// A limited API wheel for `cpXY` and newer
    Version(String),
}

impl WheelLimitedApi {
    /// Whether the wheel targets the limited API at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, WheelLimitedApi::Disabled)
    }

    /// The minor version out of `cp3X`
    fn minor_version(&self) -> Option<&str> {
        match self {
            WheelLimitedApi::Version(tag) => tag.strip_prefix("cp3"),
            WheelLimitedApi::Disabled | WheelLimitedApi::Enabled => None,
        }
    }
}

impl FromStr for WheelLimitedApi {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "false" | "0" => Ok(WheelLimitedApi::Disabled),
            "true" | "1" => Ok(WheelLimitedApi::Enabled),
            tag if tag.len() > 3
                && tag.starts_with("cp3")
                && tag[3..].chars().all(|c| c.is_ascii_digit()) =>
            {
                Ok(WheelLimitedApi::Version(tag.to_string()))
            }
            other => Err(format!(
                "invalid limited API tag `{other}`, expected something like `cp38`"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn set(features: &[&str]) -> BTreeSet<String> {
        features.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(WheelLimitedApi::Disabled, false, &["pyo3/extension-module"])]
    #[case(WheelLimitedApi::Enabled, true, &["pyo3/abi3", "pyo3/extension-module"])]
    #[case(
        WheelLimitedApi::Version("cp38".to_string()),
        true,
        &["pyo3/abi3-py38", "pyo3/extension-module"]
    )]
    #[case(
        WheelLimitedApi::Version("cp310".to_string()),
        true,
        &["pyo3/abi3-py310", "pyo3/extension-module"]
    )]
    fn test_pyo3_features(
        #[case] wheel: WheelLimitedApi,
        #[case] limited: bool,
        #[case] expected: &[&str],
    ) {
        assert_eq!(Binding::PyO3.features(limited, &wheel), set(expected));
    }

    #[test]
    fn test_other_binding_features() {
        let wheel = WheelLimitedApi::Enabled;
        assert_eq!(
            Binding::RustCPython.features(true, &wheel),
            set(&["cpython/extension-module", "cpython/python3-sys"])
        );
        assert!(Binding::NoBinding.features(true, &wheel).is_empty());
        assert!(Binding::Exec.features(true, &wheel).is_empty());
    }

    #[test]
    fn test_artifact_kinds() {
        assert_eq!(Binding::Exec.artifact_kinds(), &["bin"]);
        assert_eq!(Binding::PyO3.artifact_kinds(), &["cdylib", "dylib"]);
        assert!(Binding::Exec.uses_exec());
        assert!(!Binding::NoBinding.uses_exec());
    }

    #[rstest]
    #[case(PyLimitedApi::Auto, WheelLimitedApi::Disabled, false)]
    #[case(PyLimitedApi::Auto, WheelLimitedApi::Enabled, true)]
    #[case(PyLimitedApi::ForceOn, WheelLimitedApi::Disabled, true)]
    #[case(PyLimitedApi::ForceOff, WheelLimitedApi::Enabled, false)]
    fn test_resolve_limited_api(
        #[case] ext: PyLimitedApi,
        #[case] wheel: WheelLimitedApi,
        #[case] expected: bool,
    ) {
        assert_eq!(ext.resolve(&wheel), expected);
    }

    #[test]
    fn test_wheel_limited_api_from_str() {
        assert_eq!("cp39".parse(), Ok(WheelLimitedApi::Version("cp39".to_string())));
        assert_eq!("true".parse(), Ok(WheelLimitedApi::Enabled));
        assert_eq!("false".parse(), Ok(WheelLimitedApi::Disabled));
        assert!("py3".parse::<WheelLimitedApi>().is_err());
    }
}
