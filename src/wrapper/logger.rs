//! Request logger wrappers.
//!
//! Each request and response is rendered as a plain-text dump and handed to a
//! [`RequestLogOutput`]. Credentials are masked. Output failures are reported through
//! `tracing` and never fail the request.

use super::{ConnectionWrapper, WrapperKind};
use crate::connection::{ApiRequest, ApiResponse, Connection, AUTHORIZATION};
use crate::error::ConnectionError;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, warn};

/// Replacement text for credential values.
pub const REDACTED: &str = "[PRIVATE DATA HIDDEN]";

/// Destination for request/response dumps.
pub trait RequestLogOutput: Send + Sync {
    /// Write one complete dump.
    fn write_entry(&self, entry: &str) -> io::Result<()>;
}

/// Writes dumps to stderr.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalLogOutput;

impl RequestLogOutput for TerminalLogOutput {
    fn write_entry(&self, entry: &str) -> io::Result<()> {
        let mut err = io::stderr().lock();
        writeln!(err, "{entry}")
    }
}

/// Appends dumps to a file, creating it if needed.
#[derive(Clone, Debug)]
pub struct FileLogOutput {
    path: PathBuf,
}

impl FileLogOutput {
    /// Log to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RequestLogOutput for FileLogOutput {
    fn write_entry(&self, entry: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{entry}")
    }
}

/// Keeps dumps in memory (tests/diagnostics).
#[derive(Clone, Debug, Default)]
pub struct MemoryLogOutput {
    entries: Arc<Mutex<Vec<String>>>,
}

impl MemoryLogOutput {
    /// Create an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded dumps.
    pub fn entries(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl RequestLogOutput for MemoryLogOutput {
    fn write_entry(&self, entry: &str) -> io::Result<()> {
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry.to_string()),
            Err(poisoned) => poisoned.into_inner().push(entry.to_string()),
        }
        Ok(())
    }
}

fn timestamp() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

fn push_headers(out: &mut String, headers: &BTreeMap<String, String>) {
    for (name, value) in headers {
        let value = if name == AUTHORIZATION { REDACTED } else { value.as_str() };
        out.push_str(&format!("{name}: {value}\n"));
    }
}

fn push_body(out: &mut String, body: &[u8]) {
    if body.is_empty() {
        return;
    }
    out.push('\n');
    out.push_str(&String::from_utf8_lossy(body));
    out.push('\n');
}

/// Render the request dump.
pub fn format_request(req: &ApiRequest) -> String {
    let mut out = format!("REQUEST: [{}]\n", timestamp());
    out.push_str(&format!("{} {} HTTP/1.1\n", req.method, req.path_and_query()));
    if let Some(host) = req.url.host_str() {
        match req.url.port() {
            Some(port) => out.push_str(&format!("Host: {host}:{port}\n")),
            None => out.push_str(&format!("Host: {host}\n")),
        }
    }
    push_headers(&mut out, &req.headers);
    if let Some(body) = &req.body {
        push_body(&mut out, body);
    }
    out
}

/// Render the response dump for a result coming back up the chain.
pub fn format_response(result: &Result<ApiResponse, ConnectionError>) -> String {
    let mut out = format!("RESPONSE: [{}]\n", timestamp());
    match result {
        Ok(resp) => {
            out.push_str(&format!("HTTP/1.1 {}\n", resp.status));
            push_headers(&mut out, &resp.headers);
            push_body(&mut out, &resp.body);
        }
        Err(ConnectionError::Status { status, body }) => {
            out.push_str(&format!("HTTP/1.1 {status}\n"));
            push_body(&mut out, body.as_bytes());
        }
        Err(ConnectionError::InvalidToken(body)) => {
            out.push_str("HTTP/1.1 401\n");
            push_body(&mut out, body.as_bytes());
        }
        Err(other) => out.push_str(&format!("ERROR: {other}\n")),
    }
    out
}

/// Tower layer that dumps traffic to an output.
#[derive(Clone)]
pub struct RequestLoggerLayer {
    output: Arc<dyn RequestLogOutput>,
    kind: WrapperKind,
}

impl RequestLoggerLayer {
    /// Logger writing to the terminal.
    pub fn terminal(output: Arc<dyn RequestLogOutput>) -> Self {
        Self { output, kind: WrapperKind::TerminalLogger }
    }

    /// Logger writing to a file.
    pub fn file(output: Arc<dyn RequestLogOutput>) -> Self {
        Self { output, kind: WrapperKind::FileLogger }
    }
}

/// Service produced by [`RequestLoggerLayer`].
#[derive(Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    output: Arc<dyn RequestLogOutput>,
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService { inner, output: self.output.clone() }
    }
}

fn emit(output: &dyn RequestLogOutput, entry: &str) {
    if let Err(e) = output.write_entry(entry) {
        warn!(error = %e, "failed to write request log entry");
    }
}

impl<S> Service<ApiRequest> for RequestLoggerService<S>
where
    S: Service<ApiRequest, Response = ApiResponse, Error = ConnectionError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = ApiResponse;
    type Error = ConnectionError;
    type Future = BoxFuture<'static, Result<ApiResponse, ConnectionError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ConnectionError>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let output = self.output.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            debug!(method = %req.method, url = %req.url, "request");
            emit(output.as_ref(), &format_request(&req));
            let result = inner.oneshot(req).await;
            match &result {
                Ok(resp) => debug!(status = resp.status, "response"),
                Err(e) => debug!(error = %e, "request failed"),
            }
            emit(output.as_ref(), &format_response(&result));
            result
        })
    }
}

impl ConnectionWrapper for RequestLoggerLayer {
    fn kind(&self) -> WrapperKind {
        self.kind
    }

    fn wrap(&self, inner: Connection) -> Connection {
        Connection::new(self.layer(inner))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
