//! Command resolution: built-in, then extension, then legacy fallback.
//!
//! Built-in parsing never touches the extension catalog. An unknown command with a
//! matching extension never reaches the legacy fallback. With no extension match and
//! no fallback configured, resolution fails with an [`UnknownCommandError`] carrying
//! suggestions.

use super::builtin::{builtin_names, BuiltinCommand, Cli};
use super::extension::{ExtensionCatalog, ExtensionInvocation};
use super::legacy::{LegacyFallback, LegacyInvocation};
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Maximum edit distance for a suggestion.
const SUGGESTION_DISTANCE: usize = 2;

/// Where an invocation goes.
#[derive(Debug)]
pub enum Resolution {
    /// A parsed built-in command.
    Builtin(Cli),
    /// An installed extension.
    Extension(ExtensionInvocation),
    /// Delegation to the legacy binary.
    Legacy(LegacyInvocation),
}

/// The typed command is neither built in nor provided by an extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownCommandError {
    /// Command as typed.
    pub command: String,
    /// Binary name used in the hint.
    pub binary_name: String,
    /// Similar known commands.
    pub suggestions: Vec<String>,
}

impl UnknownCommandError {
    /// Error for `command` with no suggestions.
    pub fn new(command: impl Into<String>, binary_name: impl Into<String>) -> Self {
        Self { command: command.into(), binary_name: binary_name.into(), suggestions: Vec::new() }
    }

    /// Attach every name within edit distance 2 of the command or starting with it.
    pub fn suggest<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let typed = self.command.to_lowercase();
        for name in names {
            let name = name.as_ref();
            let close = name.starts_with(&typed) || levenshtein(&typed, name) <= SUGGESTION_DISTANCE;
            if close && !self.suggestions.iter().any(|s| s == name) {
                self.suggestions.push(name.to_string());
            }
        }
        self
    }
}

impl fmt::Display for UnknownCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is not a registered command. See '{} help -a'",
            self.command, self.binary_name
        )?;
        if !self.suggestions.is_empty() {
            write!(f, "\n\nDid you mean?")?;
            for s in &self.suggestions {
                write!(f, "\n      {s}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for UnknownCommandError {}

/// Why an invocation could not be resolved.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    /// Unknown command with no extension and no fallback.
    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommandError),
    /// Any other argument error, including help and version displays.
    #[error(transparent)]
    Parse(#[from] clap::Error),
}

impl ResolveError {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::UnknownCommand(_) => 1,
            ResolveError::Parse(e) => match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => e.exit_code(),
            },
        }
    }

    /// Whether the output belongs on stdout (help and version displays).
    pub fn is_display(&self) -> bool {
        self.exit_code() == 0
    }
}

/// Resolves raw argument vectors.
pub struct CommandResolver {
    catalog: Arc<dyn ExtensionCatalog>,
    legacy: Option<LegacyFallback>,
    binary_name: String,
}

impl fmt::Debug for CommandResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResolver")
            .field("legacy", &self.legacy)
            .field("binary_name", &self.binary_name)
            .finish()
    }
}

impl CommandResolver {
    /// Resolver with the fallback this build was compiled with.
    pub fn new(catalog: Arc<dyn ExtensionCatalog>, binary_name: impl Into<String>) -> Self {
        Self { catalog, legacy: LegacyFallback::configured(), binary_name: binary_name.into() }
    }

    /// Override the legacy fallback.
    pub fn with_legacy(mut self, legacy: Option<LegacyFallback>) -> Self {
        self.legacy = legacy;
        self
    }

    /// Resolve `args` (including the program name).
    pub fn resolve(&self, args: &[String]) -> Result<Resolution, ResolveError> {
        match Cli::try_parse_from(args) {
            Ok(Cli { command: BuiltinCommand::External(rest), .. }) => self.resolve_unknown(args, rest),
            Ok(cli) => Ok(Resolution::Builtin(cli)),
            Err(e) if e.kind() == ErrorKind::InvalidSubcommand => {
                let rest = match e.get(ContextKind::InvalidSubcommand) {
                    Some(ContextValue::String(name)) => vec![name.clone()],
                    _ => return Err(e.into()),
                };
                self.resolve_unknown(args, rest)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_unknown(&self, args: &[String], rest: Vec<String>) -> Result<Resolution, ResolveError> {
        let mut rest = rest.into_iter();
        let command = rest.next().unwrap_or_default();

        if let Some(extension) = self.catalog.find(&command) {
            debug!(%command, extension = %extension.name, "resolved to extension");
            return Ok(Resolution::Extension(ExtensionInvocation {
                extension,
                command,
                args: rest.collect(),
            }));
        }

        if let Some(legacy) = &self.legacy {
            debug!(%command, binary = %legacy.binary().display(), "resolved to legacy fallback");
            return Ok(Resolution::Legacy(legacy.invocation(args.iter().skip(1).cloned().collect())));
        }

        let names = builtin_names().into_iter().chain(self.catalog.command_names());
        Err(UnknownCommandError::new(command, &self.binary_name).suggest(names).into())
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, left) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, right) in b_chars.iter().enumerate() {
            let cost = usize::from(left != *right);
            current[j + 1] = (previous[j + 1] + 1).min(current[j] + 1).min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}
