use anyhow::{anyhow, Context, Result};
use cf_bootstrap::command::{dispatch, BuiltinContext, CommandResolver, ExtensionRegistry, PluginConfig};
use cf_bootstrap::config::{config_home, CliConfig, EnvOverrides};
use cf_bootstrap::zone::{extract_zone, ZonePreflight};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const BINARY_NAME: &str = "cfb";

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("CF_LOG")
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn utf8_args(raw: impl IntoIterator<Item = OsString>) -> Result<Vec<String>> {
    raw.into_iter()
        .map(|arg| arg.into_string().map_err(|bad| anyhow!("argument {bad:?} is not valid UTF-8")))
        .collect()
}

async fn run() -> Result<i32> {
    let (zone, args) = extract_zone(utf8_args(std::env::args_os())?)?;
    let zone_home = match zone {
        Some(zone) => Some(ZonePreflight::from_env(zone)?.run()?),
        None => None,
    };

    let home = config_home(zone_home.as_deref())?;
    let config = CliConfig::load(&home, EnvOverrides::from_env(), BINARY_NAME, env!("CARGO_PKG_VERSION"))
        .context("failed to load configuration")?;

    let plugin_home = std::env::var_os("CF_PLUGIN_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home.clone());
    let catalog = Arc::new(ExtensionRegistry::from_config(PluginConfig::load(&plugin_home)?));

    let resolver = CommandResolver::new(catalog.clone(), BINARY_NAME);
    let ctx = BuiltinContext::new(Arc::new(config), catalog);

    let (mut out, mut err) = (std::io::stdout(), std::io::stderr());
    let code = dispatch(&args, &resolver, &ctx, &mut out, &mut err).await;
    out.flush()?;
    Ok(code)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Unexpected error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_arguments_pass_through() {
        let args = utf8_args(["cfb", "api"].map(OsString::from)).unwrap();
        assert_eq!(args, vec!["cfb", "api"]);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_argument_is_an_error() {
        use std::os::unix::ffi::OsStringExt;
        let bad = OsString::from_vec(vec![b'a', 0xff]);
        let err = utf8_args([OsString::from("cfb"), bad]).unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }
}
