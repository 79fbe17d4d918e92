//! Identity-provider client.
//!
//! Owns an independent wrapper chain. It is usable for token requests only after
//! [`IdentityClient::setup_resources`] has resolved the provider's capability document;
//! after that it is shared immutably behind an `Arc`.

use crate::config::Config;
use crate::connection::{parse_url, ApiRequest, Connection, TransportFactory, TransportSettings, AUTHORIZATION};
use crate::error::ConnectionError;
use crate::wrapper::{ConnectionWrapper, WrapperKind};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::{debug, info};

/// Errors raised by the identity client.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum IdentityError {
    /// `setup_resources` was called without an endpoint.
    #[error("identity endpoint must not be empty")]
    EmptyEndpoint,
    /// The endpoint is malformed or did not return a usable capability document.
    #[error("unable to resolve identity endpoint {endpoint}: {reason}")]
    EndpointResolution {
        /// Endpoint that was being resolved.
        endpoint: String,
        /// What went wrong.
        reason: String,
    },
    /// A token operation was attempted before `setup_resources`.
    #[error("identity client resources have not been set up")]
    NotSetUp,
    /// Transport failure, unchanged.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Links advertised by the identity provider's `/login` document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityResources {
    /// Token-issuing service base URL.
    pub uaa: String,
    /// Login service base URL.
    pub login: String,
}

#[derive(Deserialize)]
struct LoginDocument {
    #[serde(default)]
    links: LoginLinks,
}

#[derive(Deserialize, Default)]
struct LoginLinks {
    #[serde(default)]
    uaa: Option<String>,
    #[serde(default)]
    login: Option<String>,
}

/// Tokens returned by a refresh grant.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RefreshedTokens {
    /// New access token (without type prefix).
    pub access_token: String,
    /// New refresh token.
    #[serde(default)]
    pub refresh_token: String,
    /// Token type, normally `bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl RefreshedTokens {
    /// Value for the `authorization` header.
    pub fn authorization_token(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Client for the identity/token-issuing service.
pub struct IdentityClient {
    client_id: String,
    client_secret: String,
    connection: Connection,
    wrappers: Vec<Arc<dyn ConnectionWrapper>>,
    resources: IdentityResources,
}

impl std::fmt::Debug for IdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityClient")
            .field("client_id", &self.client_id)
            .field("wrappers", &self.wrapper_kinds())
            .field("resources", &self.resources)
            .finish()
    }
}

impl IdentityClient {
    /// Create a client from configuration. No I/O happens here.
    pub fn new(config: &dyn Config, transport: &dyn TransportFactory) -> Self {
        let settings = TransportSettings {
            skip_ssl_validation: config.skip_ssl_validation(),
            dial_timeout: config.dial_timeout(),
            user_agent: format!("{}/{}", config.binary_name(), config.binary_version()),
        };
        Self {
            client_id: config.uaa_oauth_client(),
            client_secret: config.uaa_oauth_client_secret(),
            connection: transport.connect(&settings),
            wrappers: Vec::new(),
            resources: IdentityResources::default(),
        }
    }

    /// Wrap the current connection with `wrapper`.
    ///
    /// Call before [`setup_resources`](Self::setup_resources), loggers first, then the
    /// authentication wrapper, then the retrier.
    pub fn wrap_connection(&mut self, wrapper: Arc<dyn ConnectionWrapper>) {
        self.connection = wrapper.wrap(self.connection.clone());
        self.wrappers.push(wrapper);
    }

    /// Wrappers applied so far, in order.
    pub fn wrappers(&self) -> &[Arc<dyn ConnectionWrapper>] {
        &self.wrappers
    }

    /// Kinds of the wrappers applied so far.
    pub fn wrapper_kinds(&self) -> Vec<WrapperKind> {
        crate::wrapper::kinds(&self.wrappers)
    }

    /// Resolved links; empty before `setup_resources`.
    pub fn resources(&self) -> &IdentityResources {
        &self.resources
    }

    /// Resolve the capability document at `endpoint`.
    ///
    /// Links the provider does not advertise default to `endpoint` itself.
    pub async fn setup_resources(&mut self, endpoint: &str) -> Result<(), IdentityError> {
        if endpoint.trim().is_empty() {
            return Err(IdentityError::EmptyEndpoint);
        }
        let base = endpoint.trim_end_matches('/');
        let url = parse_url(&format!("{base}/login")).map_err(|e| IdentityError::EndpointResolution {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        debug!(%url, "resolving identity resources");
        let resp = self.connection.clone().oneshot(ApiRequest::get(url)).await?;
        let doc: LoginDocument = resp.json().map_err(|e| IdentityError::EndpointResolution {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let or_base = |link: Option<String>| {
            link.filter(|l| !l.is_empty()).unwrap_or_else(|| base.to_string())
        };
        self.resources = IdentityResources { uaa: or_base(doc.links.uaa), login: or_base(doc.links.login) };
        info!(uaa = %self.resources.uaa, login = %self.resources.login, "identity resources resolved");
        Ok(())
    }

    /// Exchange `refresh_token` for a new token pair.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedTokens, IdentityError> {
        if self.resources.uaa.is_empty() {
            return Err(IdentityError::NotSetUp);
        }
        let url = parse_url(&format!("{}/oauth/token", self.resources.uaa.trim_end_matches('/')))?;
        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let req = ApiRequest::post_form(
            url,
            &[("grant_type", "refresh_token"), ("refresh_token", refresh_token)],
        )
        .with_header(AUTHORIZATION, format!("Basic {credentials}"));

        let resp = self.connection.clone().oneshot(req).await?;
        Ok(resp.json::<RefreshedTokens>()?)
    }
}
