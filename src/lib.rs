#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # cf-bootstrap
//!
//! Authenticated client bootstrap and command resolution for a platform CLI.
//!
//! ## Features
//!
//! - **Client bootstrap**: builds a control-plane client and an identity client, each
//!   with its own tower wrapper chain (request loggers, authentication, retry), and
//!   binds both authentication wrappers to the identity client once it exists
//! - **Command resolution**: built-in commands via `clap`, then installed extensions,
//!   then an optional legacy binary that takes over the process
//! - **Zone pre-flight**: `-z/--zone` selects a separate configuration home
//!
//! ## Quick Start
//!
//! ```no_run
//! use cf_bootstrap::bootstrap::Bootstrap;
//! use cf_bootstrap::config::{config_home, CliConfig, EnvOverrides};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let home = config_home(None)?;
//! let config = Arc::new(CliConfig::load(&home, EnvOverrides::from_env(), "cfb", "1.0.0")?);
//! let clients = Bootstrap::new(config.clone(), config).new_clients(true).await?;
//! println!("identity: {}", clients.cloud_controller.identity_endpoint());
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod cloud_controller;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod wrapper;
pub mod zone;

// Re-exports
pub use bootstrap::{Bootstrap, BootstrapStage, Clients, LogOutputs, StandardLogOutputs};
pub use cloud_controller::{CloudControllerClient, CloudControllerConfig, JobError, JobState, RootInfo, TargetSettings};
pub use command::{CommandResolver, Resolution, ResolveError, UnknownCommandError};
pub use config::{CliConfig, Config, ConfigError, EnvOverrides, TokenCache};
pub use connection::{ApiRequest, ApiResponse, Connection, HttpTransportFactory, TransportFactory, TransportSettings};
pub use error::{BootstrapError, ConnectionError};
pub use identity::{IdentityClient, IdentityError, RefreshedTokens};
pub use wrapper::{AuthenticationWrapper, ConnectionWrapper, RequestLoggerLayer, RetryLayer, WrapperKind};
pub use zone::{extract_zone, ZoneError, ZonePreflight};
