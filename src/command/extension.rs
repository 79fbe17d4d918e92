//! Installed extensions (plugins).
//!
//! Extensions are described by `plugins/config.json` and registered by the command
//! names and aliases they provide. The resolver only consults the catalog once a
//! command failed to parse as a built-in.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::RwLock;
use tracing::{debug, warn};

/// One command contributed by an extension.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtensionCommand {
    /// Command name.
    pub name: String,
    /// Optional short alias.
    #[serde(default)]
    pub alias: Option<String>,
    /// One-line help.
    #[serde(default)]
    pub help_text: String,
}

impl ExtensionCommand {
    fn matches(&self, command: &str) -> bool {
        self.name == command || self.alias.as_deref().is_some_and(|a| !a.is_empty() && a == command)
    }
}

/// Semantic version advertised by an extension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtensionVersion {
    /// Major component.
    #[serde(default)]
    pub major: u32,
    /// Minor component.
    #[serde(default)]
    pub minor: u32,
    /// Build component.
    #[serde(default)]
    pub build: u32,
}

impl fmt::Display for ExtensionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// An installed extension.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extension {
    /// Extension name.
    pub name: String,
    /// Executable path.
    pub location: PathBuf,
    /// Advertised version.
    pub version: ExtensionVersion,
    /// Commands it provides.
    pub commands: Vec<ExtensionCommand>,
}

/// Lookup surface used by the resolver.
pub trait ExtensionCatalog: Send + Sync {
    /// Extension providing `command` by name or alias.
    fn find(&self, command: &str) -> Option<Extension>;
    /// Every command name and alias the catalog knows.
    fn command_names(&self) -> Vec<String>;
    /// All installed extensions, sorted by name.
    fn extensions(&self) -> Vec<Extension>;
}

/// Failure reading the extension config.
#[derive(thiserror::Error, Debug)]
pub enum ExtensionConfigError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// File is not a valid extension config.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct PluginEntry {
    #[serde(rename = "Location")]
    location: PathBuf,
    #[serde(rename = "Version", default)]
    version: ExtensionVersion,
    #[serde(rename = "Commands", default)]
    commands: Vec<ExtensionCommand>,
}

/// Contents of `plugins/config.json`.
#[derive(Deserialize, Default)]
pub struct PluginConfig {
    #[serde(rename = "Plugins", default)]
    plugins: BTreeMap<String, PluginEntry>,
}

impl PluginConfig {
    /// Path of the config under `home` (`<home>/.cf/plugins/config.json`).
    pub fn path(home: &Path) -> PathBuf {
        home.join(".cf").join("plugins").join("config.json")
    }

    /// Load from `<home>/.cf/plugins/config.json`; a missing file means no extensions.
    pub fn load(home: &Path) -> Result<Self, ExtensionConfigError> {
        let path = Self::path(home);
        match fs::read_to_string(&path) {
            Ok(raw) => Self::parse(&raw).map_err(|source| ExtensionConfigError::Parse { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no plugin config");
                Ok(Self::default())
            }
            Err(source) => Err(ExtensionConfigError::Io { path, source }),
        }
    }

    /// Parse a config document.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Extensions described by this config.
    pub fn into_extensions(self) -> Vec<Extension> {
        self.plugins
            .into_iter()
            .map(|(name, entry)| Extension {
                name,
                location: entry.location,
                version: entry.version,
                commands: entry.commands,
            })
            .collect()
    }
}

/// Registry of installed extensions keyed by name.
pub struct ExtensionRegistry {
    extensions: RwLock<BTreeMap<String, Extension>>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { extensions: RwLock::new(BTreeMap::new()) }
    }

    /// Registry holding every extension in `config`.
    pub fn from_config(config: PluginConfig) -> Self {
        let registry = Self::new();
        for ext in config.into_extensions() {
            registry.register(ext);
        }
        registry
    }

    /// Register an extension. An extension with the same name is replaced.
    pub fn register(&self, extension: Extension) {
        let mut guard = match self.extensions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(extension.name.clone(), extension);
    }

    /// Registered extension names (sorted).
    pub fn names(&self) -> Vec<String> {
        self.read(|m| m.keys().cloned().collect())
    }

    /// Whether an extension with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.read(|m| m.contains_key(name))
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, Extension>) -> T) -> T {
        match self.extensions.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry").field("registered_extensions", &self.names()).finish()
    }
}

impl ExtensionCatalog for ExtensionRegistry {
    fn find(&self, command: &str) -> Option<Extension> {
        self.read(|m| m.values().find(|ext| ext.commands.iter().any(|c| c.matches(command))).cloned())
    }

    fn command_names(&self) -> Vec<String> {
        self.read(|m| {
            let mut names: Vec<String> = m
                .values()
                .flat_map(|ext| ext.commands.iter())
                .flat_map(|c| std::iter::once(c.name.clone()).chain(c.alias.clone().filter(|a| !a.is_empty())))
                .collect();
            names.sort();
            names.dedup();
            names
        })
    }

    fn extensions(&self) -> Vec<Extension> {
        self.read(|m| m.values().cloned().collect())
    }
}

/// A resolved extension run: executable, command name and trailing arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionInvocation {
    /// Extension providing the command.
    pub extension: Extension,
    /// Command name as typed.
    pub command: String,
    /// Arguments after the command name.
    pub args: Vec<String>,
}

impl ExtensionInvocation {
    /// Process that runs this invocation.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.extension.location);
        cmd.arg(&self.command).args(&self.args);
        cmd
    }

    /// Run the extension to completion and return the exit code to use.
    ///
    /// Failure to start or termination by signal yields 1.
    pub fn run(&self) -> i32 {
        debug!(extension = %self.extension.name, command = %self.command, "running extension");
        match self.command().status() {
            Ok(status) => status.code().unwrap_or(1),
            Err(err) => {
                warn!(
                    extension = %self.extension.name,
                    location = %self.extension.location.display(),
                    error = %err,
                    "failed to start extension"
                );
                1
            }
        }
    }
}
