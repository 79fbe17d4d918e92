//! Built-in commands.

use crate::bootstrap::Bootstrap;
use crate::command::extension::ExtensionCatalog;
use crate::config::{CliConfig, Config, ConfigError, TokenCache};
use crate::error::{BootstrapError, ConnectionError};
use crate::identity::IdentityError;
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;

/// Parsed command line for built-in commands.
///
/// Unknown subcommands are captured as [`BuiltinCommand::External`] so the resolver can
/// try extensions and the legacy fallback.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "cfb",
    arg_required_else_help = true,
    allow_external_subcommands = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Dump every request and response to the terminal.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: BuiltinCommand,
}

/// Built-in subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum BuiltinCommand {
    /// Show help.
    Help {
        /// Include installed plugin commands.
        #[arg(short = 'a', long)]
        all: bool,
    },
    /// Print the binary version.
    Version,
    /// Show the targeted API endpoint.
    Api,
    /// Connect to the targeted API and show its endpoints.
    Target {
        /// Record this space as the targeted space.
        #[arg(short = 's', long)]
        space: Option<String>,
    },
    /// Refresh and print the current OAuth token.
    OauthToken,
    /// List installed plugins.
    Plugins,
    /// Anything else.
    #[command(external_subcommand)]
    External(Vec<String>),
}

/// Names of all built-in subcommands.
pub fn builtin_names() -> Vec<String> {
    Cli::command().get_subcommands().map(|c| c.get_name().to_string()).collect()
}

/// Failures while executing a built-in command.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CommandError {
    /// Client bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// A request failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Identity provider failure.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// Configuration could not be persisted.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Output could not be written.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// What built-in commands need at execution time.
pub struct BuiltinContext {
    /// Loaded configuration (also the token cache).
    pub config: Arc<CliConfig>,
    /// Client bootstrap.
    pub bootstrap: Bootstrap,
    /// Installed extensions.
    pub catalog: Arc<dyn ExtensionCatalog>,
}

impl BuiltinContext {
    /// Context bootstrapping over real HTTP.
    pub fn new(config: Arc<CliConfig>, catalog: Arc<dyn ExtensionCatalog>) -> Self {
        let bootstrap = Bootstrap::new(config.clone(), config.clone());
        Self { config, bootstrap, catalog }
    }
}

/// Execute a built-in command, writing user output to `out`. Returns the exit code.
pub async fn execute(
    command: &BuiltinCommand,
    ctx: &BuiltinContext,
    out: &mut dyn Write,
) -> Result<i32, CommandError> {
    match command {
        BuiltinCommand::Help { all } => {
            let mut cli = Cli::command().bin_name(ctx.config.binary_name());
            writeln!(out, "{}", cli.render_help())?;
            if *all {
                let extensions = ctx.catalog.extensions();
                if !extensions.is_empty() {
                    writeln!(out, "Plugin commands:")?;
                }
                for cmd in extensions.iter().flat_map(|e| e.commands.iter()) {
                    writeln!(out, "  {:<20} {}", cmd.name, cmd.help_text)?;
                }
            }
        }
        BuiltinCommand::Version => {
            writeln!(out, "{} version {}", ctx.config.binary_name(), ctx.config.binary_version())?;
        }
        BuiltinCommand::Api => {
            let target = ctx.config.target();
            if target.is_empty() {
                writeln!(out, "No API endpoint set.")?;
            } else {
                writeln!(out, "API endpoint: {target}")?;
            }
        }
        BuiltinCommand::Target { space } => {
            let clients = ctx.bootstrap.new_clients(true).await?;
            if let Some(space) = space {
                ctx.config.set_space_name(space.clone());
                ctx.config.write()?;
            }
            let info = clients.cloud_controller.info().cloned().unwrap_or_default();
            writeln!(out, "API endpoint:   {}", ctx.config.target())?;
            writeln!(out, "API version:    {}", info.api_version())?;
            writeln!(out, "Identity:       {}", clients.cloud_controller.identity_endpoint())?;
            let space = ctx.config.snapshot().space_name;
            if !space.is_empty() {
                writeln!(out, "Space:          {space}")?;
            }
        }
        BuiltinCommand::OauthToken => {
            let clients = ctx.bootstrap.new_clients(true).await?;
            if let Some(identity) = clients.identity {
                let tokens = identity.refresh_access_token(&ctx.config.refresh_token()).await?;
                ctx.config.set_access_token(tokens.authorization_token());
                ctx.config.set_refresh_token(tokens.refresh_token.clone());
                ctx.config.write()?;
                writeln!(out, "{}", tokens.authorization_token())?;
            }
        }
        BuiltinCommand::Plugins => {
            let extensions = ctx.catalog.extensions();
            if extensions.is_empty() {
                writeln!(out, "No plugins installed.")?;
            }
            for ext in extensions {
                for cmd in &ext.commands {
                    match cmd.alias.as_deref().filter(|a| !a.is_empty()) {
                        Some(alias) => writeln!(out, "{}\t{}, {}\t{}", ext.name, cmd.name, alias, cmd.help_text)?,
                        None => writeln!(out, "{}\t{}\t{}", ext.name, cmd.name, cmd.help_text)?,
                    }
                }
            }
        }
        BuiltinCommand::External(args) => {
            // The resolver never hands external commands to this function.
            let name = args.first().map(String::as_str).unwrap_or_default();
            writeln!(out, "'{name}' is not a built-in command")?;
            return Ok(1);
        }
    }
    Ok(0)
}
