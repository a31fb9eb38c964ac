//! Queries against `rustc`: version, target list and `--print cfg`.
//!
//! Every query is a subprocess call, so [`RustcInfo`] memoizes the answers for
//! as long as it lives, keyed by target and environment.

use crate::util::{display_command, EnvVars};
use crate::BuildError;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use rustc_version::VersionMeta;
use std::collections::HashMap;
use std::env;
use std::io;
use std::process::Command;
use std::sync::Mutex;
use tracing::{debug, instrument};

/// The answers we need from the Rust compiler
pub trait Toolchain {
    /// `rustc -V`
    fn version(&self, env: &EnvVars) -> Result<semver::Version>;
    /// `rustc --print cfg`, for the default target when `target` is `None`
    fn cfgs(&self, target: Option<&str>, env: &EnvVars) -> Result<RustcCfgs>;
    /// `rustc --print target-list`
    fn target_list(&self, env: &EnvVars) -> Result<Vec<String>>;
}

/// Parsed `rustc --print cfg` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RustcCfgs(IndexMap<String, Option<String>>);

impl RustcCfgs {
    /// Parses lines like `target_os="linux"` and `unix`
    pub fn parse(output: &str) -> Self {
        let cfgs = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.trim_matches('"').to_string())),
                None => (line.to_string(), None),
            })
            .collect();
        Self(cfgs)
    }

    /// The value of a `key="value"` cfg
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.as_deref())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for RustcCfgs {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.to_string(), Some(value.to_string())))
                .collect(),
        )
    }
}

type CfgKey = (Option<String>, EnvVars);

/// [Toolchain] implementation that runs `rustc` (or `$RUSTC`) and caches the results
#[derive(Debug)]
pub struct RustcInfo {
    rustc: String,
    version_meta: Mutex<HashMap<EnvVars, VersionMeta>>,
    cfgs: Mutex<HashMap<CfgKey, RustcCfgs>>,
    target_list: Mutex<HashMap<EnvVars, Vec<String>>>,
}

impl Default for RustcInfo {
    fn default() -> Self {
        Self::new(env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string()))
    }
}

impl RustcInfo {
    pub fn new(rustc: impl Into<String>) -> Self {
        Self {
            rustc: rustc.into(),
            version_meta: Mutex::default(),
            cfgs: Mutex::default(),
            target_list: Mutex::default(),
        }
    }

    fn command(&self, env: &EnvVars) -> Command {
        let mut command = Command::new(&self.rustc);
        command.envs(env);
        command
    }

    fn version_meta(&self, env: &EnvVars) -> Result<VersionMeta> {
        let mut cache = lock(&self.version_meta);
        if let Some(meta) = cache.get(env) {
            return Ok(meta.clone());
        }
        let meta = VersionMeta::for_command(self.command(env)).map_err(|err| match err {
            rustc_version::Error::CouldNotExecuteCommand(io_err)
                if io_err.kind() == io::ErrorKind::NotFound =>
            {
                anyhow::Error::new(BuildError::ToolchainMissing {
                    program: self.rustc.clone(),
                })
            }
            err => anyhow::Error::new(BuildError::PlatformError(format!(
                "Can not get rustc version: {err}"
            ))),
        })?;
        debug!(version = %meta.semver, host = %meta.host, "Detected rustc");
        cache.insert(env.clone(), meta.clone());
        Ok(meta)
    }

    fn print(&self, args: &[&str], env: &EnvVars) -> Result<String> {
        let mut command = self.command(env);
        command.args(args);
        let output = match command.output() {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BuildError::ToolchainMissing {
                    program: self.rustc.clone(),
                }
                .into())
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to run `{}`", display_command(&command)))
            }
        };
        if !output.status.success() {
            return Err(BuildError::PlatformError(format!(
                "`{}` failed with {}\n{}",
                display_command(&command),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        String::from_utf8(output.stdout)
            .with_context(|| format!("`{}` printed invalid utf-8", display_command(&command)))
    }
}

impl Toolchain for RustcInfo {
    fn version(&self, env: &EnvVars) -> Result<semver::Version> {
        Ok(self.version_meta(env)?.semver)
    }

    #[instrument(skip(self, env))]
    fn cfgs(&self, target: Option<&str>, env: &EnvVars) -> Result<RustcCfgs> {
        let key = (target.map(ToString::to_string), env.clone());
        if let Some(cfgs) = lock(&self.cfgs).get(&key) {
            return Ok(cfgs.clone());
        }
        let mut args = vec!["--print", "cfg"];
        if let Some(target) = target {
            args.extend(["--target", target]);
        }
        let cfgs = RustcCfgs::parse(&self.print(&args, env)?);
        lock(&self.cfgs).insert(key, cfgs.clone());
        Ok(cfgs)
    }

    fn target_list(&self, env: &EnvVars) -> Result<Vec<String>> {
        if let Some(list) = lock(&self.target_list).get(env) {
            return Ok(list.clone());
        }
        let list: Vec<String> = self
            .print(&["--print", "target-list"], env)?
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        lock(&self.target_list).insert(env.clone(), list.clone());
        Ok(list)
    }
}

/// Locks a cache, ignoring poisoning
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
