//! Control-plane (resource API) client.
//!
//! Construction is pure. [`CloudControllerClient::target`] creates the base transport
//! from the target settings, stacks the configured wrappers on it, and reads the
//! platform's root document to discover the identity endpoint. A failed `target` is
//! returned as-is; per-request retry belongs to the wrapper chain.

use crate::connection::{
    parse_url, ApiRequest, ApiResponse, Connection, TransportFactory, TransportSettings,
};
use crate::error::ConnectionError;
use crate::wrapper::{build_chain, ConnectionWrapper, WrapperKind};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;
use tracing::{debug, info};

/// Construction parameters.
#[derive(Clone)]
pub struct CloudControllerConfig {
    /// Binary name, used in the user agent.
    pub app_name: String,
    /// Binary version, used in the user agent.
    pub app_version: String,
    /// Overall bound on job polling.
    pub job_polling_timeout: Duration,
    /// Pause between job polls.
    pub job_polling_interval: Duration,
    /// Wrappers, innermost first.
    pub wrappers: Vec<Arc<dyn ConnectionWrapper>>,
}

/// Where and how to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetSettings {
    /// API root URL.
    pub url: String,
    /// Accept invalid TLS certificates.
    pub skip_ssl_validation: bool,
    /// Connect timeout.
    pub dial_timeout: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
struct Link {
    #[serde(default)]
    href: String,
    #[serde(default)]
    meta: Option<LinkMeta>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
struct LinkMeta {
    #[serde(default)]
    version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
struct RootLinks {
    #[serde(rename = "self", default)]
    self_link: Link,
    #[serde(default)]
    cloud_controller_v3: Link,
    #[serde(default)]
    uaa: Link,
    #[serde(default)]
    login: Link,
}

/// The platform's root document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RootInfo {
    #[serde(default)]
    links: RootLinks,
}

impl RootInfo {
    /// Advertised root URL.
    pub fn root(&self) -> &str {
        &self.links.self_link.href
    }

    /// Resource API base URL.
    pub fn cloud_controller_url(&self) -> &str {
        &self.links.cloud_controller_v3.href
    }

    /// Resource API version.
    pub fn api_version(&self) -> &str {
        self.links.cloud_controller_v3.meta.as_ref().map_or("", |m| m.version.as_str())
    }

    /// Identity provider URL; empty when not advertised.
    pub fn uaa(&self) -> &str {
        &self.links.uaa.href
    }

    /// Login service URL; empty when not advertised.
    pub fn login(&self) -> &str {
        &self.links.login.href
    }
}

/// State reported by an asynchronous job.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Still running.
    Processing,
    /// Waiting to be retried by the platform.
    Polling,
    /// Finished successfully.
    Complete,
    /// Finished with errors.
    Failed,
}

#[derive(Debug, Deserialize)]
struct JobDocument {
    #[serde(default)]
    guid: String,
    state: JobState,
    #[serde(default)]
    errors: Vec<JobErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct JobErrorDetail {
    #[serde(default)]
    detail: String,
}

/// Failures while polling a job.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum JobError {
    /// The job reported `FAILED`.
    #[error("job {guid} failed: {detail}")]
    Failed {
        /// Job identifier.
        guid: String,
        /// First error detail reported.
        detail: String,
    },
    /// The job did not finish within the polling timeout.
    #[error("job polling timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout {
        /// Time spent polling.
        elapsed: Duration,
        /// Configured limit.
        timeout: Duration,
    },
    /// Request failure, unchanged.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Client for the platform's resource API.
pub struct CloudControllerClient {
    app_name: String,
    app_version: String,
    job_polling_timeout: Duration,
    job_polling_interval: Duration,
    wrappers: Vec<Arc<dyn ConnectionWrapper>>,
    transport: Arc<dyn TransportFactory>,
    connection: Option<Connection>,
    info: Option<RootInfo>,
}

impl std::fmt::Debug for CloudControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudControllerClient")
            .field("app_name", &self.app_name)
            .field("app_version", &self.app_version)
            .field("wrappers", &self.wrapper_kinds())
            .field("targeted", &self.connection.is_some())
            .field("info", &self.info)
            .finish()
    }
}

impl CloudControllerClient {
    /// Construct without any I/O.
    pub fn new(config: CloudControllerConfig, transport: Arc<dyn TransportFactory>) -> Self {
        Self {
            app_name: config.app_name,
            app_version: config.app_version,
            job_polling_timeout: config.job_polling_timeout,
            job_polling_interval: config.job_polling_interval,
            wrappers: config.wrappers,
            transport,
            connection: None,
            info: None,
        }
    }

    /// Connect to `settings.url` and read the root document.
    pub async fn target(&mut self, settings: TargetSettings) -> Result<RootInfo, ConnectionError> {
        let url = parse_url(&settings.url)?;
        let base = self.transport.connect(&TransportSettings {
            skip_ssl_validation: settings.skip_ssl_validation,
            dial_timeout: settings.dial_timeout,
            user_agent: format!("{}/{}", self.app_name, self.app_version),
        });
        let connection = build_chain(base, &self.wrappers);

        debug!(%url, "targeting API");
        let info: RootInfo = connection.clone().oneshot(ApiRequest::get(url)).await?.json()?;
        info!(
            api = %info.cloud_controller_url(),
            version = %info.api_version(),
            uaa = %info.uaa(),
            "targeted API"
        );
        self.connection = Some(connection);
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Identity endpoint discovered by `target`; empty before it succeeds or when the
    /// platform advertises none.
    pub fn identity_endpoint(&self) -> &str {
        self.info.as_ref().map_or("", RootInfo::uaa)
    }

    /// Root document from the last successful `target`.
    pub fn info(&self) -> Option<&RootInfo> {
        self.info.as_ref()
    }

    /// Wrappers configured at construction, innermost first.
    pub fn wrappers(&self) -> &[Arc<dyn ConnectionWrapper>] {
        &self.wrappers
    }

    /// Kinds of the configured wrappers.
    pub fn wrapper_kinds(&self) -> Vec<WrapperKind> {
        crate::wrapper::kinds(&self.wrappers)
    }

    /// Configured job polling bounds as `(timeout, interval)`.
    pub fn polling(&self) -> (Duration, Duration) {
        (self.job_polling_timeout, self.job_polling_interval)
    }

    /// Send `req` through the wrapper chain.
    pub async fn send(&self, req: ApiRequest) -> Result<ApiResponse, ConnectionError> {
        let connection = self.connection.clone().ok_or(ConnectionError::NotTargeted)?;
        connection.oneshot(req).await
    }

    /// `GET` a path relative to the resource API base (or an absolute URL).
    pub async fn get(&self, path: &str) -> Result<ApiResponse, ConnectionError> {
        let info = self.info.as_ref().ok_or(ConnectionError::NotTargeted)?;
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            parse_url(path)?
        } else {
            let base = info.cloud_controller_url().trim_end_matches('/');
            parse_url(&format!("{base}/{}", path.trim_start_matches('/')))?
        };
        self.send(ApiRequest::get(url)).await
    }

    /// Poll `job_url` until the job completes, fails, or the polling timeout elapses.
    pub async fn poll_job(&self, job_url: &str) -> Result<(), JobError> {
        let start = Instant::now();
        match tokio::time::timeout(self.job_polling_timeout, self.poll_until_done(job_url)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout { elapsed: start.elapsed(), timeout: self.job_polling_timeout }),
        }
    }

    async fn poll_until_done(&self, job_url: &str) -> Result<(), JobError> {
        loop {
            let job: JobDocument = self.get(job_url).await?.json()?;
            match job.state {
                JobState::Complete => return Ok(()),
                JobState::Failed => {
                    let detail = job.errors.into_iter().next().map(|e| e.detail).unwrap_or_default();
                    return Err(JobError::Failed { guid: job.guid, detail });
                }
                JobState::Processing | JobState::Polling => {
                    debug!(job = %job.guid, "job still running");
                    tokio::time::sleep(self.job_polling_interval).await;
                }
            }
        }
    }
}
