//! Legacy fallback: hand the whole invocation to another binary.
//!
//! Enabled only in builds with the `legacy-fallback` feature. Delegation never
//! returns; nothing may run after [`LegacyInvocation::exec`].

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error};

/// Environment variable naming the legacy binary.
pub const LEGACY_BINARY_ENV: &str = "CF_LEGACY_BINARY";
/// Legacy binary used when the variable is unset.
pub const DEFAULT_LEGACY_BINARY: &str = "cf6";
/// Trace variable forwarded to the legacy binary.
pub const TRACE_ENV: &str = "CF_TRACE";

/// Where and how to delegate unknown commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyFallback {
    binary: PathBuf,
    trace: Option<String>,
}

impl LegacyFallback {
    /// Fallback to `binary`, forwarding `trace` as `CF_TRACE`.
    pub fn new(binary: impl Into<PathBuf>, trace: Option<String>) -> Self {
        Self { binary: binary.into(), trace }
    }

    /// Fallback described by the process environment.
    pub fn from_env() -> Self {
        let binary = std::env::var_os(LEGACY_BINARY_ENV)
            .filter(|b| !b.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEGACY_BINARY));
        Self::new(binary, std::env::var(TRACE_ENV).ok())
    }

    /// The fallback compiled into this build, if any.
    pub fn configured() -> Option<Self> {
        if cfg!(feature = "legacy-fallback") {
            Some(Self::from_env())
        } else {
            None
        }
    }

    /// Binary that receives delegated invocations.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Delegation of `args` (the full argument vector without the program name).
    pub fn invocation(&self, args: Vec<String>) -> LegacyInvocation {
        LegacyInvocation { binary: self.binary.clone(), trace: self.trace.clone(), args }
    }
}

/// A pending delegation to the legacy binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyInvocation {
    /// Binary to run.
    pub binary: PathBuf,
    /// Value forwarded as `CF_TRACE`.
    pub trace: Option<String>,
    /// Original arguments.
    pub args: Vec<String>,
}

impl LegacyInvocation {
    /// Process that carries out the delegation.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args);
        if let Some(trace) = &self.trace {
            cmd.env(TRACE_ENV, trace);
        }
        cmd
    }

    /// Replace the current process with the legacy binary.
    ///
    /// On Unix the process image is replaced; elsewhere the binary runs as a child
    /// and this process exits with its code. Failing to start exits with 1.
    pub fn exec(self) -> ! {
        debug!(binary = %self.binary.display(), "delegating to legacy binary");
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = self.command().exec();
            error!(binary = %self.binary.display(), error = %err, "failed to exec legacy binary");
            eprintln!("failed to run {}: {err}", self.binary.display());
            std::process::exit(1)
        }
        #[cfg(not(unix))]
        {
            match self.command().status() {
                Ok(status) => std::process::exit(status.code().unwrap_or(1)),
                Err(err) => {
                    error!(binary = %self.binary.display(), error = %err, "failed to run legacy binary");
                    eprintln!("failed to run {}: {err}", self.binary.display());
                    std::process::exit(1)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_forwards_args_and_trace() {
        let fallback = LegacyFallback::new("/usr/local/bin/cf6", Some("true".into()));
        let inv = fallback.invocation(vec!["push".into(), "my-app".into()]);
        let cmd = inv.command();
        assert_eq!(cmd.get_program(), "/usr/local/bin/cf6");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, vec!["push", "my-app"]);
        let trace = cmd.get_envs().find(|(k, _)| *k == TRACE_ENV).and_then(|(_, v)| v);
        assert_eq!(trace, Some(std::ffi::OsStr::new("true")));
    }

    #[test]
    fn no_trace_leaves_environment_alone() {
        let inv = LegacyFallback::new("cf6", None).invocation(Vec::new());
        assert_eq!(inv.command().get_envs().count(), 0);
    }

    #[test]
    fn configured_follows_build_feature() {
        assert_eq!(LegacyFallback::configured().is_some(), cfg!(feature = "legacy-fallback"));
    }
}
