//! Zone pre-flight.
//!
//! `-z/--zone <name>` selects a separate configuration home at `$HOME/.cfm/<name>`.
//! Before any command runs, the user's `$HOME/.cf` is copied into it and the binary is
//! re-run as `target -s <name>` against the new home. The zone home is handed back to
//! the caller to load configuration from; no process environment is modified.
//!
//! The copy runs on every invocation that carries the flag and overwrites files already
//! present in the zone home.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory under `$HOME` holding zone homes.
pub const ZONES_DIR: &str = ".cfm";

/// Failures of the zone pre-flight.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ZoneError {
    /// `$HOME` is not set.
    #[error("could not determine the home directory for zone setup")]
    HomeNotFound,
    /// `-z/--zone` without a value.
    #[error("option '{flag}' requires a zone name")]
    MissingValue {
        /// Flag as typed.
        flag: String,
    },
    /// Zone name that cannot be a directory name.
    #[error("invalid zone name '{0}'")]
    InvalidName(String),
    /// Copying the configuration failed.
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Re-targeting the zone failed.
    #[error("failed to target zone {zone}: {reason}")]
    Retarget {
        /// Zone name.
        zone: String,
        /// What went wrong.
        reason: String,
    },
}

/// Remove the zone flags from `args`, returning the last zone given and the rest.
///
/// Accepts `-z name`, `-zname`, `--zone name` and `--zone=name` between the program
/// name and the command. Scanning stops at the first positional argument or `--`, so
/// arguments meant for the command itself are never taken.
pub fn extract_zone(args: Vec<String>) -> Result<(Option<String>, Vec<String>), ZoneError> {
    let mut zone = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    rest.extend(iter.next());

    while let Some(arg) = iter.next() {
        if arg == "--" || !arg.starts_with('-') || arg == "-" {
            rest.push(arg);
            rest.extend(iter.by_ref());
            break;
        }
        if arg == "-z" || arg == "--zone" {
            match iter.next() {
                Some(value) => zone = Some(value),
                None => return Err(ZoneError::MissingValue { flag: arg }),
            }
        } else if let Some(value) = arg.strip_prefix("--zone=") {
            zone = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("-z").filter(|v| !v.is_empty()) {
            zone = Some(value.to_string());
        } else {
            rest.push(arg);
        }
    }

    Ok((zone, rest))
}

/// Prepares the configuration home for a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZonePreflight {
    home: PathBuf,
    zone: String,
    binary: PathBuf,
}

impl ZonePreflight {
    /// Pre-flight for `zone` under `home`, re-targeting with `binary`.
    pub fn new(home: impl Into<PathBuf>, zone: impl Into<String>, binary: impl Into<PathBuf>) -> Result<Self, ZoneError> {
        let zone = zone.into();
        let valid = !zone.is_empty()
            && zone != "."
            && zone != ".."
            && !zone.contains(['/', '\\']);
        if !valid {
            return Err(ZoneError::InvalidName(zone));
        }
        Ok(Self { home: home.into(), zone, binary: binary.into() })
    }

    /// Pre-flight using `$HOME` and the running executable.
    pub fn from_env(zone: impl Into<String>) -> Result<Self, ZoneError> {
        let home = std::env::var_os("HOME").filter(|h| !h.is_empty()).ok_or(ZoneError::HomeNotFound)?;
        let binary = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("cfb"));
        Self::new(home, zone, binary)
    }

    /// Zone name.
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// `$HOME/.cfm/<zone>`, used as `CF_HOME` for the zone.
    pub fn zone_home(&self) -> PathBuf {
        self.home.join(ZONES_DIR).join(&self.zone)
    }

    /// Copy `$HOME/.cf` to `<zone home>/.cf`. Returns the number of files copied.
    ///
    /// A missing `$HOME/.cf` copies nothing.
    pub fn copy_config(&self) -> Result<usize, ZoneError> {
        let src = self.home.join(".cf");
        let dest = self.zone_home().join(".cf");
        if !src.is_dir() {
            debug!(path = %src.display(), "no configuration to copy into zone");
            return Ok(0);
        }

        let mut copied = 0;
        for entry in WalkDir::new(&src) {
            let entry = entry.map_err(|e| ZoneError::Copy {
                from: src.clone(),
                to: dest.clone(),
                source: e.into(),
            })?;
            let relative = entry.path().strip_prefix(&src).unwrap_or(entry.path());
            let target = dest.join(relative);
            let copy_err = |source| ZoneError::Copy {
                from: entry.path().to_path_buf(),
                to: target.clone(),
                source,
            };

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(copy_err)?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target).map_err(copy_err)?;
                copied += 1;
            } else {
                debug!(path = %entry.path().display(), "skipping non-regular file");
            }
        }
        info!(zone = %self.zone, files = copied, dest = %dest.display(), "zone configuration copied");
        Ok(copied)
    }

    /// `<binary> target -s <zone>` with `CF_HOME` set to the zone home.
    pub fn retarget_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["target", "-s", self.zone.as_str()]).env("CF_HOME", self.zone_home());
        cmd
    }

    /// Run the re-target command to completion.
    pub fn retarget(&self) -> Result<(), ZoneError> {
        let output = self.retarget_command().output().map_err(|e| ZoneError::Retarget {
            zone: self.zone.clone(),
            reason: e.to_string(),
        })?;
        if output.status.success() {
            debug!(zone = %self.zone, "zone targeted");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = match stderr.trim() {
            "" => output.status.to_string(),
            text => text.to_string(),
        };
        Err(ZoneError::Retarget { zone: self.zone.clone(), reason })
    }

    /// Copy the configuration and re-target. Returns the zone home.
    ///
    /// A failed copy aborts; a failed re-target is logged and the zone home is still
    /// returned.
    pub fn run(&self) -> Result<PathBuf, ZoneError> {
        self.copy_config()?;
        if let Err(err) = self.retarget() {
            warn!(zone = %self.zone, error = %err, "zone re-target failed");
            eprintln!("{err}");
        }
        Ok(self.zone_home())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn zone_flags_before_the_command_are_stripped() {
        let (zone, rest) = extract_zone(strings(&["cfb", "-v", "-z", "dev", "target"])).unwrap();
        assert_eq!(zone.as_deref(), Some("dev"));
        assert_eq!(rest, strings(&["cfb", "-v", "target"]));

        let (zone, rest) = extract_zone(strings(&["cfb", "--zone=prod", "api"])).unwrap();
        assert_eq!(zone.as_deref(), Some("prod"));
        assert_eq!(rest, strings(&["cfb", "api"]));

        let (zone, _) = extract_zone(strings(&["cfb", "-zqa", "--zone", "stage", "api"])).unwrap();
        assert_eq!(zone.as_deref(), Some("stage"), "last flag wins");
    }

    #[test]
    fn command_arguments_are_left_alone() {
        let (zone, rest) = extract_zone(strings(&["cfb", "bgd", "app", "-zip"])).unwrap();
        assert!(zone.is_none());
        assert_eq!(rest, strings(&["cfb", "bgd", "app", "-zip"]));

        let (zone, rest) = extract_zone(strings(&["cfb", "-z", "dev", "ssh", "--zone", "x"])).unwrap();
        assert_eq!(zone.as_deref(), Some("dev"));
        assert_eq!(rest, strings(&["cfb", "ssh", "--zone", "x"]));
    }

    #[test]
    fn args_after_double_dash_are_untouched() {
        let (zone, rest) = extract_zone(strings(&["cfb", "ssh", "--", "-z", "x"])).unwrap();
        assert!(zone.is_none());
        assert_eq!(rest, strings(&["cfb", "ssh", "--", "-z", "x"]));
    }

    #[test]
    fn dangling_flag_is_an_error() {
        let err = extract_zone(strings(&["cfb", "--zone"])).unwrap_err();
        assert!(matches!(err, ZoneError::MissingValue { ref flag } if flag == "--zone"));
    }

    #[test]
    fn zone_names_cannot_escape_the_zones_dir() {
        for bad in ["", ".", "..", "a/b", "..\\x"] {
            assert!(matches!(ZonePreflight::new("/home/u", bad, "cfb"), Err(ZoneError::InvalidName(_))));
        }
    }

    #[test]
    fn zone_home_lives_under_cfm() {
        let p = ZonePreflight::new("/home/u", "dev", "cfb").unwrap();
        assert_eq!(p.zone_home(), PathBuf::from("/home/u/.cfm/dev"));
        let cmd = p.retarget_command();
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, vec!["target", "-s", "dev"]);
        let home = cmd.get_envs().find(|(k, _)| *k == "CF_HOME").and_then(|(_, v)| v);
        assert_eq!(home, Some(Path::new("/home/u/.cfm/dev").as_os_str()));
    }

    #[test]
    fn copies_nested_configuration() {
        let home = tempfile::tempdir().unwrap();
        fs::create_dir_all(home.path().join(".cf/plugins")).unwrap();
        fs::write(home.path().join(".cf/config.json"), r#"{"Target":"https://api.example.com"}"#).unwrap();
        fs::write(home.path().join(".cf/plugins/config.json"), r#"{"Plugins":{}}"#).unwrap();

        let p = ZonePreflight::new(home.path(), "dev", "cfb").unwrap();
        assert_eq!(p.copy_config().unwrap(), 2);
        let copied = fs::read_to_string(p.zone_home().join(".cf/config.json")).unwrap();
        assert!(copied.contains("api.example.com"));
        assert!(p.zone_home().join(".cf/plugins/config.json").is_file());
    }

    #[test]
    fn repeated_copy_overwrites_zone_state() {
        let home = tempfile::tempdir().unwrap();
        fs::create_dir_all(home.path().join(".cf")).unwrap();
        fs::write(home.path().join(".cf/config.json"), r#"{"Target":"https://one"}"#).unwrap();
        let p = ZonePreflight::new(home.path(), "dev", "cfb").unwrap();
        p.copy_config().unwrap();

        // State written into the zone home is replaced by the next copy.
        fs::write(p.zone_home().join(".cf/config.json"), r#"{"SpaceName":"dev"}"#).unwrap();
        fs::write(home.path().join(".cf/config.json"), r#"{"Target":"https://two"}"#).unwrap();
        p.copy_config().unwrap();
        let copied = fs::read_to_string(p.zone_home().join(".cf/config.json")).unwrap();
        assert_eq!(copied, r#"{"Target":"https://two"}"#);
    }

    #[test]
    fn missing_source_copies_nothing() {
        let home = tempfile::tempdir().unwrap();
        let p = ZonePreflight::new(home.path(), "dev", "cfb").unwrap();
        assert_eq!(p.copy_config().unwrap(), 0);
    }

    #[test]
    fn failed_retarget_is_not_fatal() {
        let home = tempfile::tempdir().unwrap();
        let p = ZonePreflight::new(home.path(), "dev", "/definitely/not/here/cfb").unwrap();
        assert!(matches!(p.retarget(), Err(ZoneError::Retarget { .. })));
        assert_eq!(p.run().unwrap(), home.path().join(".cfm/dev"));
    }
}
