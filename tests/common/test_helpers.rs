#![allow(dead_code)]

use cf_bootstrap::bootstrap::{Bootstrap, LogOutputs};
use cf_bootstrap::config::{CliConfig, ConfigFile, EnvOverrides};
use cf_bootstrap::connection::{check_status, ApiRequest, ApiResponse, Connection, TransportFactory, TransportSettings};
use cf_bootstrap::error::ConnectionError;
use cf_bootstrap::wrapper::{MemoryLogOutput, RequestLogOutput};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const API: &str = "https://api.example.com";
pub const UAA: &str = "https://uaa.example.com";

type Reply = Result<ApiResponse, ConnectionError>;

#[derive(Default)]
struct FakeState {
    routes: HashMap<String, VecDeque<Reply>>,
    requests: Vec<ApiRequest>,
    connects: Vec<TransportSettings>,
}

/// Transport factory answering from canned routes and recording every request.
///
/// Each route holds a queue of replies; the last one repeats. Unrouted URLs fail as
/// transport errors.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

fn route_key(url: &str) -> String {
    let mut url = url::Url::parse(url).unwrap();
    url.set_query(None);
    url.to_string()
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, status: u16, body: Value) -> &Self {
        self.reply(url, Ok(ApiResponse::json_body(status, &body)))
    }

    pub fn route_error(&self, url: &str, err: ConnectionError) -> &Self {
        self.reply(url, Err(err))
    }

    fn reply(&self, url: &str, reply: Reply) -> &Self {
        self.state.lock().unwrap().routes.entry(route_key(url)).or_default().push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_urls(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.url.to_string()).collect()
    }

    pub fn connects(&self) -> Vec<TransportSettings> {
        self.state.lock().unwrap().connects.clone()
    }
}

fn respond(state: &Mutex<FakeState>, req: ApiRequest) -> Reply {
    let mut state = state.lock().unwrap();
    state.requests.push(req.clone());
    let key = route_key(req.url.as_str());
    let Some(queue) = state.routes.get_mut(&key) else {
        return Err(ConnectionError::Transport { url: key, message: "no route".into() });
    };
    let reply = if queue.len() > 1 { queue.pop_front().unwrap() } else { queue.front().cloned().unwrap() };
    reply.and_then(check_status)
}

impl TransportFactory for FakeTransport {
    fn connect(&self, settings: &TransportSettings) -> Connection {
        self.state.lock().unwrap().connects.push(settings.clone());
        let state = self.state.clone();
        Connection::new(tower::service_fn(move |req: ApiRequest| {
            let reply = respond(&state, req);
            async move { reply }
        }))
    }
}

/// Logger outputs kept in memory; file outputs remember their path.
#[derive(Default)]
pub struct MemoryOutputs {
    pub terminal: MemoryLogOutput,
    files: Mutex<Vec<(PathBuf, MemoryLogOutput)>>,
}

impl MemoryOutputs {
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn file_entries(&self) -> Vec<String> {
        self.files.lock().unwrap().iter().flat_map(|(_, out)| out.entries()).collect()
    }
}

impl LogOutputs for MemoryOutputs {
    fn terminal(&self) -> Arc<dyn RequestLogOutput> {
        Arc::new(self.terminal.clone())
    }

    fn file(&self, path: &Path) -> Arc<dyn RequestLogOutput> {
        let out = MemoryLogOutput::new();
        self.files.lock().unwrap().push((path.to_path_buf(), out.clone()));
        Arc::new(out)
    }
}

pub fn config_file(target: &str) -> ConfigFile {
    ConfigFile {
        target: target.into(),
        access_token: "bearer old-access".into(),
        refresh_token: "old-refresh".into(),
        ..Default::default()
    }
}

pub fn config(target: &str, trace: Option<&str>) -> Arc<CliConfig> {
    let env = EnvOverrides { trace: trace.map(String::from), ..Default::default() };
    Arc::new(CliConfig::new("/nonexistent/.cf/config.json", config_file(target), env, "cfb", "1.2.3"))
}

pub fn bootstrap(config: &Arc<CliConfig>, transport: &FakeTransport, outputs: &Arc<MemoryOutputs>) -> Bootstrap {
    Bootstrap::new(config.clone(), config.clone())
        .with_transport(Arc::new(transport.clone()))
        .with_log_outputs(outputs.clone())
}

pub fn root_document(uaa: Option<&str>) -> Value {
    let mut links = json!({
        "self": {"href": API},
        "cloud_controller_v3": {"href": format!("{API}/v3"), "meta": {"version": "3.150.0"}},
        "login": {"href": "https://login.example.com"}
    });
    if let Some(uaa) = uaa {
        links["uaa"] = json!({"href": uaa});
    }
    json!({"links": links})
}

pub fn login_document(uaa: &str) -> Value {
    json!({"links": {"uaa": uaa, "login": "https://login.example.com"}})
}

/// Transport serving a healthy platform at [`API`] with its identity provider at [`UAA`].
pub fn healthy_platform() -> FakeTransport {
    let transport = FakeTransport::new();
    transport.route(API, 200, root_document(Some(UAA)));
    transport.route(&format!("{UAA}/login"), 200, login_document(UAA));
    transport
}
