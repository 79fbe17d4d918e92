//! Client bootstrap: builds the control-plane and identity clients and wires their
//! authentication wrappers together.
//!
//! Stages, in order:
//! 1. `CcBuilt`: wrapper chain and control-plane client exist; the authentication
//!    wrapper is unbound. Non-targeting callers stop here.
//! 2. `Targeted`: the target URL answered and its root document was read.
//! 3. `UaaBuilt`: the identity client has its own chain and resolved its resources.
//! 4. `Wired`: both authentication wrappers reference the identity client.
//! 5. `Ready`: the pair is returned.
//!
//! Any failure ends the sequence with the error; nothing is retried at this level.
//! The bind in step 4 happens before the clients are handed out, so no request made
//! through a returned client ever sees an unbound wrapper.

use crate::cloud_controller::{CloudControllerClient, CloudControllerConfig, TargetSettings};
use crate::config::{Config, TokenCache};
use crate::connection::{HttpTransportFactory, TransportFactory};
use crate::error::BootstrapError;
use crate::identity::IdentityClient;
use crate::wrapper::{
    AuthenticationWrapper, ConnectionWrapper, FileLogOutput, RequestLogOutput, RequestLoggerLayer,
    RetryLayer, TerminalLogOutput,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Progress of a bootstrap run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapStage {
    /// Nothing built yet.
    Init,
    /// Control-plane client built.
    CcBuilt,
    /// Target URL reached.
    Targeted,
    /// Identity client built and set up.
    UaaBuilt,
    /// Authentication wrappers bound.
    Wired,
    /// Both clients returned.
    Ready,
}

/// Clients produced by a bootstrap run.
#[derive(Debug)]
pub struct Clients {
    /// Control-plane client.
    pub cloud_controller: CloudControllerClient,
    /// Identity client; `None` for non-targeting runs.
    pub identity: Option<Arc<IdentityClient>>,
    /// Stage the run ended in: `CcBuilt` or `Ready`.
    pub stage: BootstrapStage,
}

/// Creates logger outputs; lets tests capture what would go to the terminal or a file.
pub trait LogOutputs: Send + Sync {
    /// Output used when verbose logging is on.
    fn terminal(&self) -> Arc<dyn RequestLogOutput>;
    /// Output for a log file destination.
    fn file(&self, path: &Path) -> Arc<dyn RequestLogOutput>;
}

/// Stderr for the terminal, append-only files for destinations.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardLogOutputs;

impl LogOutputs for StandardLogOutputs {
    fn terminal(&self) -> Arc<dyn RequestLogOutput> {
        Arc::new(TerminalLogOutput)
    }

    fn file(&self, path: &Path) -> Arc<dyn RequestLogOutput> {
        Arc::new(FileLogOutput::new(path))
    }
}

/// Builds authenticated client pairs from configuration.
pub struct Bootstrap {
    config: Arc<dyn Config>,
    tokens: Arc<dyn TokenCache>,
    transport: Arc<dyn TransportFactory>,
    outputs: Arc<dyn LogOutputs>,
}

impl Bootstrap {
    /// Bootstrap over real HTTP with standard log outputs.
    pub fn new(config: Arc<dyn Config>, tokens: Arc<dyn TokenCache>) -> Self {
        Self {
            config,
            tokens,
            transport: Arc::new(HttpTransportFactory),
            outputs: Arc::new(StandardLogOutputs),
        }
    }

    /// Substitute the base transport factory.
    pub fn with_transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = transport;
        self
    }

    /// Substitute the logger outputs.
    pub fn with_log_outputs(mut self, outputs: Arc<dyn LogOutputs>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Logger wrappers for the current verbosity settings: terminal, then file.
    fn logger_wrappers(&self) -> Vec<Arc<dyn ConnectionWrapper>> {
        let (verbose, location) = self.config.verbose();
        let mut wrappers: Vec<Arc<dyn ConnectionWrapper>> = Vec::new();
        if verbose {
            wrappers.push(Arc::new(RequestLoggerLayer::terminal(self.outputs.terminal())));
        }
        if let Some(path) = location {
            wrappers.push(Arc::new(RequestLoggerLayer::file(self.outputs.file(&path))));
        }
        wrappers
    }

    /// Build clients, discovering the identity endpoint from the target.
    pub async fn new_clients(&self, target_cf: bool) -> Result<Clients, BootstrapError> {
        self.new_clients_with_authorization_endpoint(target_cf, None).await
    }

    /// Build clients; a non-empty `authorization_endpoint` takes precedence over the
    /// discovered identity endpoint.
    pub async fn new_clients_with_authorization_endpoint(
        &self,
        target_cf: bool,
        authorization_endpoint: Option<&str>,
    ) -> Result<Clients, BootstrapError> {
        let config = self.config.as_ref();

        let mut cc_wrappers = self.logger_wrappers();
        let cc_auth = Arc::new(AuthenticationWrapper::new(self.tokens.clone()));
        cc_wrappers.push(cc_auth.clone());
        cc_wrappers.push(Arc::new(RetryLayer::new(config.request_retry_count())));

        let mut cloud_controller = CloudControllerClient::new(
            CloudControllerConfig {
                app_name: config.binary_name(),
                app_version: config.binary_version(),
                job_polling_timeout: config.overall_polling_timeout(),
                job_polling_interval: config.polling_interval(),
                wrappers: cc_wrappers,
            },
            self.transport.clone(),
        );
        debug!(stage = ?BootstrapStage::CcBuilt, "bootstrap");

        if !target_cf {
            return Ok(Clients { cloud_controller, identity: None, stage: BootstrapStage::CcBuilt });
        }

        let target = config.target();
        if target.is_empty() {
            return Err(BootstrapError::NoApiSet { binary_name: config.binary_name() });
        }

        cloud_controller
            .target(TargetSettings {
                url: target,
                skip_ssl_validation: config.skip_ssl_validation(),
                dial_timeout: config.dial_timeout(),
            })
            .await?;
        debug!(stage = ?BootstrapStage::Targeted, "bootstrap");

        if cloud_controller.identity_endpoint().is_empty() {
            return Err(BootstrapError::IdentityEndpointNotFound);
        }

        let mut identity = IdentityClient::new(config, self.transport.as_ref());
        for wrapper in self.logger_wrappers() {
            identity.wrap_connection(wrapper);
        }
        let identity_auth = Arc::new(AuthenticationWrapper::new(self.tokens.clone()));
        identity.wrap_connection(identity_auth.clone());
        identity.wrap_connection(Arc::new(RetryLayer::new(config.request_retry_count())));

        let endpoint = match authorization_endpoint.filter(|e| !e.is_empty()) {
            Some(explicit) => explicit.to_string(),
            None => cloud_controller.identity_endpoint().to_string(),
        };
        identity.setup_resources(&endpoint).await?;
        debug!(stage = ?BootstrapStage::UaaBuilt, %endpoint, "bootstrap");

        let identity = Arc::new(identity);
        identity_auth.bind(&identity);
        cc_auth.bind(&identity);
        debug!(stage = ?BootstrapStage::Wired, "bootstrap");

        info!(endpoint = %endpoint, "clients ready");
        Ok(Clients { cloud_controller, identity: Some(identity), stage: BootstrapStage::Ready })
    }
}
