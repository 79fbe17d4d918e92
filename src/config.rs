//! Configuration surface read by the bootstrap, plus the token cache.
//!
//! The bootstrap only ever reads [`Config`]; tokens are read and rewritten by the
//! authentication wrapper through [`TokenCache`]. [`CliConfig`] backs both with the
//! on-disk `config.json` overlaid by environment variables.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Default connect timeout for new transports.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of re-sends for transient failures.
pub const DEFAULT_RETRY_COUNT: usize = 2;
/// Default upper bound on asynchronous job polling.
pub const DEFAULT_POLLING_TIMEOUT: Duration = Duration::from_secs(60);
/// Default pause between job polls.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(3);
/// OAuth client used when the config file names none.
pub const DEFAULT_OAUTH_CLIENT: &str = "cf";

/// Read-only configuration consumed by client construction.
pub trait Config: Send + Sync {
    /// Target API URL; empty when nothing is targeted.
    fn target(&self) -> String;
    /// Whether TLS certificate validation is skipped.
    fn skip_ssl_validation(&self) -> bool;
    /// Connect timeout for new transports.
    fn dial_timeout(&self) -> Duration;
    /// Terminal logging flag and optional log file destination.
    fn verbose(&self) -> (bool, Option<PathBuf>);
    /// Number of re-sends for transient request failures.
    fn request_retry_count(&self) -> usize;
    /// Overall bound on job polling.
    fn overall_polling_timeout(&self) -> Duration;
    /// Pause between job polls.
    fn polling_interval(&self) -> Duration;
    /// Name of the running binary.
    fn binary_name(&self) -> String;
    /// Version of the running binary.
    fn binary_version(&self) -> String;
    /// OAuth client identifier for token requests.
    fn uaa_oauth_client(&self) -> String;
    /// OAuth client secret for token requests.
    fn uaa_oauth_client_secret(&self) -> String;
}

/// Mutable store for the user's access and refresh tokens.
pub trait TokenCache: Send + Sync {
    /// Current access token, including its type prefix (e.g. `bearer ...`).
    fn access_token(&self) -> String;
    /// Current refresh token.
    fn refresh_token(&self) -> String;
    /// Replace the access token.
    fn set_access_token(&self, token: String);
    /// Replace the refresh token.
    fn set_refresh_token(&self, token: String);
}

/// Errors produced while locating, reading or writing configuration.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// Neither an explicit home, `CF_HOME` nor `HOME` is available.
    #[error("unable to determine the configuration home directory")]
    HomeNotFound,
    /// The file exists but could not be read or written.
    #[error("config file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON of the expected shape.
    #[error("config file {path} is malformed: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted fields of `config.json`. Keys this crate does not model are kept in
/// [`ConfigFile::extra`] and written back unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigFile {
    /// Target API URL.
    #[serde(default)]
    pub target: String,
    /// Skip TLS validation.
    #[serde(default, rename = "SkipSSLValidation")]
    pub skip_ssl_validation: bool,
    /// Access token with type prefix.
    #[serde(default)]
    pub access_token: String,
    /// Refresh token.
    #[serde(default)]
    pub refresh_token: String,
    /// OAuth client identifier.
    #[serde(default, rename = "UAAOAuthClient")]
    pub uaa_oauth_client: String,
    /// OAuth client secret.
    #[serde(default, rename = "UAAOAuthClientSecret")]
    pub uaa_oauth_client_secret: String,
    /// Targeted space name.
    #[serde(default)]
    pub space_name: String,
    /// Every other key of the file (`ConfigVersion`, `OrganizationFields`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Environment overlay applied on top of the config file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// `CF_TRACE`: `true` enables terminal logging, a path enables file logging.
    pub trace: Option<String>,
    /// `CF_DIAL_TIMEOUT` in seconds.
    pub dial_timeout: Option<Duration>,
    /// `CF_POLLING_TIMEOUT` in seconds.
    pub polling_timeout: Option<Duration>,
}

impl EnvOverrides {
    /// Read the overlay from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the overlay through an arbitrary lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |key: &str| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        Self {
            trace: lookup("CF_TRACE").filter(|v| !v.trim().is_empty()),
            dial_timeout: seconds("CF_DIAL_TIMEOUT"),
            polling_timeout: seconds("CF_POLLING_TIMEOUT"),
        }
    }

    fn trace_flags(&self) -> (bool, Option<PathBuf>) {
        match self.trace.as_deref().map(str::trim) {
            None => (false, None),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => (true, None),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => (false, None),
            Some(path) => (false, Some(PathBuf::from(path))),
        }
    }
}

/// Resolve the directory that contains `.cf/`.
///
/// An explicit home (set by the zone pre-flight) wins over `CF_HOME`, which wins over `HOME`.
pub fn config_home(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    resolve_home(explicit, |key| std::env::var_os(key))
}

/// [`config_home`] over an arbitrary variable lookup. Empty variables count as unset.
pub fn resolve_home<F>(explicit: Option<&Path>, lookup: F) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<OsString>,
{
    if let Some(home) = explicit {
        return Ok(home.to_path_buf());
    }
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
    non_empty("CF_HOME")
        .or_else(|| non_empty("HOME"))
        .map(PathBuf::from)
        .ok_or(ConfigError::HomeNotFound)
}

/// Config file plus environment overlay; implements both [`Config`] and [`TokenCache`].
#[derive(Debug)]
pub struct CliConfig {
    path: PathBuf,
    file: RwLock<ConfigFile>,
    env: EnvOverrides,
    verbose_flag: AtomicBool,
    binary_name: String,
    binary_version: String,
}

impl CliConfig {
    /// Build from in-memory parts without touching disk.
    pub fn new(
        path: impl Into<PathBuf>,
        file: ConfigFile,
        env: EnvOverrides,
        binary_name: impl Into<String>,
        binary_version: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            file: RwLock::new(file),
            env,
            verbose_flag: AtomicBool::new(false),
            binary_name: binary_name.into(),
            binary_version: binary_version.into(),
        }
    }

    /// Load `<home>/.cf/config.json`; a missing file yields defaults.
    pub fn load(
        home: &Path,
        env: EnvOverrides,
        binary_name: impl Into<String>,
        binary_version: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let path = home.join(".cf").join("config.json");
        let file = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|source| ConfigError::Parse { path: path.clone(), source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file missing; using defaults");
                ConfigFile::default()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Ok(Self::new(path, file, env, binary_name, binary_version))
    }

    /// Persist the current state back to disk.
    pub fn write(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io { path: self.path.clone(), source };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let raw = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|source| ConfigError::Parse { path: self.path.clone(), source })?;
        fs::write(&self.path, raw).map_err(io_err)
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the persisted fields.
    pub fn snapshot(&self) -> ConfigFile {
        match self.file.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply the command-line `--verbose` flag.
    pub fn set_verbose_flag(&self, verbose: bool) {
        self.verbose_flag.store(verbose, Ordering::SeqCst);
    }

    /// Record the targeted space name.
    pub fn set_space_name(&self, space: impl Into<String>) {
        self.update(|f| f.space_name = space.into());
    }

    fn read<T>(&self, f: impl FnOnce(&ConfigFile) -> T) -> T {
        match self.file.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ConfigFile)) {
        match self.file.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl Config for CliConfig {
    fn target(&self) -> String {
        self.read(|f| f.target.clone())
    }

    fn skip_ssl_validation(&self) -> bool {
        self.read(|f| f.skip_ssl_validation)
    }

    fn dial_timeout(&self) -> Duration {
        self.env.dial_timeout.unwrap_or(DEFAULT_DIAL_TIMEOUT)
    }

    fn verbose(&self) -> (bool, Option<PathBuf>) {
        let (trace_verbose, location) = self.env.trace_flags();
        (trace_verbose || self.verbose_flag.load(Ordering::SeqCst), location)
    }

    fn request_retry_count(&self) -> usize {
        DEFAULT_RETRY_COUNT
    }

    fn overall_polling_timeout(&self) -> Duration {
        self.env.polling_timeout.unwrap_or(DEFAULT_POLLING_TIMEOUT)
    }

    fn polling_interval(&self) -> Duration {
        DEFAULT_POLLING_INTERVAL
    }

    fn binary_name(&self) -> String {
        self.binary_name.clone()
    }

    fn binary_version(&self) -> String {
        self.binary_version.clone()
    }

    fn uaa_oauth_client(&self) -> String {
        self.read(|f| {
            if f.uaa_oauth_client.is_empty() {
                DEFAULT_OAUTH_CLIENT.to_string()
            } else {
                f.uaa_oauth_client.clone()
            }
        })
    }

    fn uaa_oauth_client_secret(&self) -> String {
        self.read(|f| f.uaa_oauth_client_secret.clone())
    }
}

impl TokenCache for CliConfig {
    fn access_token(&self) -> String {
        self.read(|f| f.access_token.clone())
    }

    fn refresh_token(&self) -> String {
        self.read(|f| f.refresh_token.clone())
    }

    fn set_access_token(&self, token: String) {
        self.update(|f| f.access_token = token);
    }

    fn set_refresh_token(&self, token: String) {
        self.update(|f| f.refresh_token = token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> EnvOverrides {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EnvOverrides::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CliConfig::load(dir.path(), EnvOverrides::default(), "cfb", "1.0.0").unwrap();
        assert_eq!(cfg.target(), "");
        assert_eq!(cfg.dial_timeout(), DEFAULT_DIAL_TIMEOUT);
        assert_eq!(cfg.uaa_oauth_client(), DEFAULT_OAUTH_CLIENT);
        assert_eq!(cfg.verbose(), (false, None));
    }

    #[test]
    fn loads_fields_and_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".cf")).unwrap();
        fs::write(
            dir.path().join(".cf/config.json"),
            r#"{"ConfigVersion":3,"Target":"https://api.example.com","SkipSSLValidation":true,
               "AccessToken":"bearer a","RefreshToken":"r","UAAOAuthClient":"custom"}"#,
        )
        .unwrap();
        let cfg = CliConfig::load(dir.path(), EnvOverrides::default(), "cfb", "1.0.0").unwrap();
        assert_eq!(cfg.target(), "https://api.example.com");
        assert!(cfg.skip_ssl_validation());
        assert_eq!(cfg.access_token(), "bearer a");
        assert_eq!(cfg.refresh_token(), "r");
        assert_eq!(cfg.uaa_oauth_client(), "custom");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".cf")).unwrap();
        fs::write(dir.path().join(".cf/config.json"), "{not json").unwrap();
        let err = CliConfig::load(dir.path(), EnvOverrides::default(), "cfb", "1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn trace_env_selects_terminal_or_file() {
        let cfg = CliConfig::new("x", ConfigFile::default(), env(&[("CF_TRACE", "true")]), "b", "v");
        assert_eq!(cfg.verbose(), (true, None));

        let cfg = CliConfig::new(
            "x",
            ConfigFile::default(),
            env(&[("CF_TRACE", "/tmp/trace.log")]),
            "b",
            "v",
        );
        assert_eq!(cfg.verbose(), (false, Some(PathBuf::from("/tmp/trace.log"))));

        cfg.set_verbose_flag(true);
        assert_eq!(cfg.verbose(), (true, Some(PathBuf::from("/tmp/trace.log"))));

        let cfg = CliConfig::new("x", ConfigFile::default(), env(&[("CF_TRACE", "false")]), "b", "v");
        assert_eq!(cfg.verbose(), (false, None));
    }

    #[test]
    fn timeouts_come_from_env() {
        let cfg = CliConfig::new(
            "x",
            ConfigFile::default(),
            env(&[("CF_DIAL_TIMEOUT", "12"), ("CF_POLLING_TIMEOUT", "bogus")]),
            "b",
            "v",
        );
        assert_eq!(cfg.dial_timeout(), Duration::from_secs(12));
        assert_eq!(cfg.overall_polling_timeout(), DEFAULT_POLLING_TIMEOUT);
    }

    #[test]
    fn tokens_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CliConfig::load(dir.path(), EnvOverrides::default(), "cfb", "1").unwrap();
        cfg.set_access_token("bearer new".into());
        cfg.set_refresh_token("refresh-new".into());
        cfg.set_space_name("dev");
        cfg.write().unwrap();

        let reloaded = CliConfig::load(dir.path(), EnvOverrides::default(), "cfb", "1").unwrap();
        assert_eq!(reloaded.access_token(), "bearer new");
        assert_eq!(reloaded.refresh_token(), "refresh-new");
        assert_eq!(reloaded.snapshot().space_name, "dev");
    }

    #[test]
    fn rewrite_keeps_keys_it_does_not_model() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".cf")).unwrap();
        fs::write(
            dir.path().join(".cf/config.json"),
            r#"{"ConfigVersion":3,"Target":"https://api.example.com","UAAEndpoint":"https://uaa.example.com",
               "OrganizationFields":{"Name":"org"},"SpaceName":"old"}"#,
        )
        .unwrap();
        let cfg = CliConfig::load(dir.path(), EnvOverrides::default(), "cfb", "1").unwrap();
        cfg.set_space_name("dev");
        cfg.write().unwrap();

        let raw = fs::read_to_string(dir.path().join(".cf/config.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["ConfigVersion"], 3);
        assert_eq!(doc["UAAEndpoint"], "https://uaa.example.com");
        assert_eq!(doc["OrganizationFields"]["Name"], "org");
        assert_eq!(doc["SpaceName"], "dev");
        assert_eq!(doc["Target"], "https://api.example.com");
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> =
            pairs.iter().map(|(k, v)| (k.to_string(), OsString::from(v))).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_cf_home_falls_back_to_home() {
        let home = resolve_home(None, lookup(&[("CF_HOME", ""), ("HOME", "/home/u")])).unwrap();
        assert_eq!(home, PathBuf::from("/home/u"));

        let home = resolve_home(None, lookup(&[("CF_HOME", "/cf"), ("HOME", "/home/u")])).unwrap();
        assert_eq!(home, PathBuf::from("/cf"));

        let err = resolve_home(None, lookup(&[("CF_HOME", ""), ("HOME", "")])).unwrap_err();
        assert!(matches!(err, ConfigError::HomeNotFound));
    }

    #[test]
    fn explicit_home_wins() {
        let home = config_home(Some(Path::new("/zones/dev"))).unwrap();
        assert_eq!(home, PathBuf::from("/zones/dev"));
    }
}
