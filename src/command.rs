//! Command surface: built-ins, extensions, legacy fallback and the resolver that picks
//! between them.

pub mod builtin;
pub mod extension;
pub mod legacy;
pub mod resolver;

pub use builtin::{builtin_names, execute, BuiltinCommand, BuiltinContext, Cli, CommandError};
pub use extension::{
    Extension, ExtensionCatalog, ExtensionCommand, ExtensionConfigError, ExtensionInvocation,
    ExtensionRegistry, ExtensionVersion, PluginConfig,
};
pub use legacy::{LegacyFallback, LegacyInvocation};
pub use resolver::{CommandResolver, Resolution, ResolveError, UnknownCommandError};

use std::io::Write;
use tracing::warn;

/// Resolve and run one invocation, returning the process exit code.
///
/// Built-in output goes to `out`; errors go to `err`. A legacy resolution replaces the
/// process and never returns.
pub async fn dispatch(
    args: &[String],
    resolver: &CommandResolver,
    ctx: &BuiltinContext,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32 {
    match resolver.resolve(args) {
        Ok(Resolution::Builtin(cli)) => {
            ctx.config.set_verbose_flag(cli.verbose);
            match execute(&cli.command, ctx, out).await {
                Ok(code) => code,
                Err(e) => {
                    report(err, &format!("FAILED\n{e}"));
                    1
                }
            }
        }
        Ok(Resolution::Extension(invocation)) => invocation.run(),
        Ok(Resolution::Legacy(invocation)) => invocation.exec(),
        Err(e) => {
            let code = e.exit_code();
            let message = match &e {
                ResolveError::Parse(p) => p.render().to_string(),
                ResolveError::UnknownCommand(u) => format!("{u}\n"),
            };
            if e.is_display() {
                report(out, message.trim_end());
            } else {
                report(err, message.trim_end());
            }
            code
        }
    }
}

fn report(stream: &mut dyn Write, message: &str) {
    if let Err(e) = writeln!(stream, "{message}") {
        warn!(error = %e, "failed to write command output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliConfig, ConfigFile, EnvOverrides};
    use std::sync::Arc;

    fn ctx() -> BuiltinContext {
        let config = Arc::new(CliConfig::new(
            "/nonexistent/config.json",
            ConfigFile::default(),
            EnvOverrides::default(),
            "cfb",
            "1.0.0",
        ));
        BuiltinContext::new(config, Arc::new(ExtensionRegistry::new()))
    }

    async fn run(list: &[&str]) -> (i32, String, String) {
        let ctx = ctx();
        let resolver = CommandResolver::new(ctx.catalog.clone(), "cfb").with_legacy(None);
        let args: Vec<String> = std::iter::once("cfb").chain(list.iter().copied()).map(String::from).collect();
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = dispatch(&args, &resolver, &ctx, &mut out, &mut err).await;
        (code, String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[tokio::test]
    async fn builtin_output_goes_to_stdout() {
        let (code, out, err) = run(&["version"]).await;
        assert_eq!(code, 0);
        assert_eq!(out, "cfb version 1.0.0\n");
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn builtin_failure_exits_one() {
        let (code, _, err) = run(&["target"]).await;
        assert_eq!(code, 1);
        assert!(err.starts_with("FAILED\nNo API endpoint set."));
    }

    #[tokio::test]
    async fn unknown_command_prints_suggestions_and_exits_one() {
        let (code, out, err) = run(&["verson"]).await;
        assert_eq!(code, 1);
        assert!(out.is_empty());
        assert!(err.contains("'verson' is not a registered command. See 'cfb help -a'"));
        assert!(err.contains("version"));
    }

    #[tokio::test]
    async fn help_flag_prints_to_stdout() {
        let (code, out, err) = run(&["--help"]).await;
        assert_eq!(code, 0);
        assert!(out.contains("oauth-token"));
        assert!(err.is_empty());
    }
}
