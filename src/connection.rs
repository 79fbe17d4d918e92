//! Requests, responses and the base HTTP transport.
//!
//! Every client talks through a [`Connection`]: a type-erased tower service from
//! [`ApiRequest`] to [`ApiResponse`]. The innermost service is an [`HttpConnection`]
//! (or a fake in tests); wrappers stack on top of it.

use crate::error::ConnectionError;
use futures::future::BoxFuture;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::OnceCell;
use tower::util::BoxCloneSyncService;
use tower_service::Service;
use url::Url;

/// Type-erased request pipeline shared by both clients.
pub type Connection = BoxCloneSyncService<ApiRequest, ApiResponse, ConnectionError>;

/// Header carrying credentials.
pub const AUTHORIZATION: &str = "authorization";
/// Path suffix of the OAuth token endpoint.
pub const TOKEN_PATH: &str = "/oauth/token";

/// An outgoing request. Cloneable so it can be re-sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: Url,
    /// Headers keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Optional body bytes.
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    /// Create a request with no headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: BTreeMap::new(), body: None }
    }

    /// Create a `GET` request that accepts JSON.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url).with_header("accept", "application/json")
    }

    /// Create a form-encoded `POST` request.
    pub fn post_form(url: Url, pairs: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish();
        Self::new(Method::POST, url)
            .with_header("accept", "application/json")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body.into_bytes())
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Set or replace a header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// True for requests to the OAuth token endpoint.
    pub fn is_token_request(&self) -> bool {
        self.url.path().trim_end_matches('/').ends_with(TOKEN_PATH)
    }

    /// `path?query` as it appears on the request line.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }
}

/// A successful response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Build a response with a JSON body.
    pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self { status, headers, body: body.to_string().into_bytes() }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ConnectionError> {
        serde_json::from_slice(&self.body).map_err(|e| ConnectionError::Decode(e.to_string()))
    }
}

/// Turn non-2xx responses into errors.
///
/// A 401 whose body names `invalid_token` becomes [`ConnectionError::InvalidToken`] so the
/// authentication wrapper can refresh and re-send.
pub fn check_status(response: ApiResponse) -> Result<ApiResponse, ConnectionError> {
    if response.is_success() {
        return Ok(response);
    }
    let body = response.text();
    if response.status == 401 && body.contains("invalid_token") {
        return Err(ConnectionError::InvalidToken(body));
    }
    Err(ConnectionError::Status { status: response.status, body })
}

/// Parse a URL, mapping failures to [`ConnectionError::InvalidUrl`].
pub fn parse_url(raw: &str) -> Result<Url, ConnectionError> {
    Url::parse(raw).map_err(|e| ConnectionError::InvalidUrl { url: raw.to_string(), message: e.to_string() })
}

/// Settings applied when a base transport is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    /// Accept invalid TLS certificates.
    pub skip_ssl_validation: bool,
    /// Connect timeout.
    pub dial_timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

/// Creates base transports; the seam where tests substitute a fake.
pub trait TransportFactory: Send + Sync {
    /// Create an unwrapped connection honoring `settings`.
    fn connect(&self, settings: &TransportSettings) -> Connection;
}

/// Production factory backed by [`HttpConnection`].
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, settings: &TransportSettings) -> Connection {
        Connection::new(HttpConnection::new(settings.clone()))
    }
}

/// `reqwest`-backed base transport.
///
/// The underlying client is built on first use, so construction never fails; a TLS
/// backend failure surfaces as a [`ConnectionError::Transport`] on the first request.
#[derive(Clone, Debug)]
pub struct HttpConnection {
    settings: TransportSettings,
    client: Arc<OnceCell<reqwest::Client>>,
}

impl HttpConnection {
    /// Create a transport with the given settings.
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings, client: Arc::new(OnceCell::new()) }
    }

    /// Settings this transport was created with.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn build_client(settings: &TransportSettings) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(settings.skip_ssl_validation)
            .connect_timeout(settings.dial_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
    }
}

impl Service<ApiRequest> for HttpConnection {
    type Response = ApiResponse;
    type Error = ConnectionError;
    type Future = BoxFuture<'static, Result<ApiResponse, ConnectionError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let settings = self.settings.clone();
        let cell = self.client.clone();
        Box::pin(async move {
            let url = req.url.to_string();
            let transport = |e: reqwest::Error| ConnectionError::Transport {
                url: url.clone(),
                message: e.to_string(),
            };
            let client = cell
                .get_or_try_init(|| async { Self::build_client(&settings) })
                .await
                .map_err(transport)?;

            let mut builder = client.request(req.method.clone(), req.url.clone());
            for (name, value) in &req.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(transport)?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect();
            let body = resp.bytes().await.map_err(transport)?.to_vec();
            check_status(ApiResponse { status, headers, body })
        })
    }
}
