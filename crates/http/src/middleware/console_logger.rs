//! The console logger middleware: one structured record per request.

use crate::middleware::client_ip;
use async_trait::async_trait;
use firelynx_api::app::{HttpRequest, HttpResponse};
use firelynx_api::middleware::{ArcHandler, HttpMiddleware, RouteHandler};
use firelynx_types::config::StaticData;
use firelynx_types::error::ParticipantError;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Which fields a record carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet {
    pub method: bool,
    pub path: bool,
    pub status: bool,
    pub client_ip: bool,
    pub duration: bool,
    pub query: bool,
    pub protocol: bool,
    pub host: bool,
    pub user_agent: bool,
}

impl FieldSet {
    /// `minimal`: method, path, status.
    pub fn minimal() -> Self {
        Self {
            method: true,
            path: true,
            status: true,
            ..Default::default()
        }
    }

    /// `standard`: minimal plus client IP and duration.
    pub fn standard() -> Self {
        Self {
            client_ip: true,
            duration: true,
            ..Self::minimal()
        }
    }

    /// `detailed`: standard plus query string, protocol, host, user-agent.
    pub fn detailed() -> Self {
        Self {
            query: true,
            protocol: true,
            host: true,
            user_agent: true,
            ..Self::standard()
        }
    }

    fn from_names(names: &[String]) -> Result<Self, ParticipantError> {
        let mut fields = Self::default();
        for name in names {
            match name.as_str() {
                "method" => fields.method = true,
                "path" => fields.path = true,
                "status" => fields.status = true,
                "client_ip" => fields.client_ip = true,
                "duration" => fields.duration = true,
                "query" => fields.query = true,
                "protocol" => fields.protocol = true,
                "host" => fields.host = true,
                "user_agent" => fields.user_agent = true,
                other => {
                    return Err(ParticipantError::InvalidArgument(format!(
                        "unknown console_logger field: {other}"
                    )))
                }
            }
        }
        Ok(fields)
    }
}

/// Where records are written. Resolved, including `${NAME}` environment
/// interpolation, when the middleware is assembled at stage time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Default, Deserialize)]
struct Options {
    preset: Option<String>,
    fields: Option<Vec<String>>,
    output: Option<String>,
    #[serde(default)]
    include_paths: Vec<String>,
    #[serde(default)]
    exclude_paths: Vec<String>,
    #[serde(default)]
    include_methods: Vec<String>,
    #[serde(default)]
    exclude_methods: Vec<String>,
}

/// Replaces every `${NAME}` with the named process environment variable.
/// Unset variables expand to the empty string.
fn interpolate_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

struct Core {
    fields: FieldSet,
    output: LogOutput,
    include_paths: Vec<String>,
    exclude_paths: Vec<String>,
    include_methods: Vec<String>,
    exclude_methods: Vec<String>,
    // Lazily opened on first write so staging stays free of side effects.
    file: Mutex<Option<File>>,
}

impl Core {
    fn should_log(&self, path: &str, method: &str) -> bool {
        if !self.include_paths.is_empty()
            && !self.include_paths.iter().any(|p| path.starts_with(p))
        {
            return false;
        }
        if self.exclude_paths.iter().any(|p| path.starts_with(p)) {
            return false;
        }
        let method = method.to_ascii_uppercase();
        if !self.include_methods.is_empty() && !self.include_methods.contains(&method) {
            return false;
        }
        if self.exclude_methods.contains(&method) {
            return false;
        }
        true
    }

    fn emit(&self, record: &Map<String, Value>) {
        let line = Value::Object(record.clone()).to_string();
        match &self.output {
            LogOutput::Stdout => println!("{line}"),
            LogOutput::Stderr => eprintln!("{line}"),
            LogOutput::File(path) => {
                let mut guard = self.file.lock();
                if guard.is_none() {
                    match OpenOptions::new().create(true).append(true).open(path) {
                        Ok(f) => *guard = Some(f),
                        Err(e) => {
                            tracing::error!(
                                target: "http-middleware",
                                path = %path.display(),
                                error = %e,
                                "cannot open console_logger output"
                            );
                            return;
                        }
                    }
                }
                if let Some(f) = guard.as_mut() {
                    let _ = writeln!(f, "{line}");
                }
            }
        }
    }
}

/// A structured per-request logger with declarative field selection and
/// include/exclude filters on paths and methods.
pub struct ConsoleLogger {
    core: Arc<Core>,
}

impl ConsoleLogger {
    /// Builds the logger from declarative options. The preset selects the
    /// field set (`standard` when absent and no manual `fields` are given);
    /// a manual `fields` list uses exactly the enabled fields. The output
    /// destination is interpolated from the environment here, at stage time.
    pub fn from_options(options: &StaticData) -> Result<Self, ParticipantError> {
        let options: Options = serde_json::from_value(Value::Object(options.clone()))
            .map_err(|e| {
                ParticipantError::InvalidArgument(format!("invalid console_logger options: {e}"))
            })?;
        let fields = match (options.preset.as_deref(), &options.fields) {
            (Some("minimal"), _) => FieldSet::minimal(),
            (Some("standard"), _) => FieldSet::standard(),
            (Some("detailed"), _) => FieldSet::detailed(),
            (Some(other), _) => {
                return Err(ParticipantError::InvalidArgument(format!(
                    "unknown console_logger preset: {other}"
                )))
            }
            (None, Some(names)) => FieldSet::from_names(names)?,
            (None, None) => FieldSet::standard(),
        };
        let output = match options.output.as_deref() {
            None | Some("stdout") => LogOutput::Stdout,
            Some("stderr") => LogOutput::Stderr,
            Some(raw) => LogOutput::File(PathBuf::from(interpolate_env(raw))),
        };
        Ok(Self {
            core: Arc::new(Core {
                fields,
                output,
                include_paths: options.include_paths,
                exclude_paths: options.exclude_paths,
                include_methods: options
                    .include_methods
                    .iter()
                    .map(|m| m.to_ascii_uppercase())
                    .collect(),
                exclude_methods: options
                    .exclude_methods
                    .iter()
                    .map(|m| m.to_ascii_uppercase())
                    .collect(),
                file: Mutex::new(None),
            }),
        })
    }

    /// The enabled field set.
    pub fn fields(&self) -> FieldSet {
        self.core.fields
    }

    /// The resolved output destination.
    pub fn output(&self) -> &LogOutput {
        &self.core.output
    }

    /// Whether a request with this path and method would be logged.
    pub fn should_log(&self, path: &str, method: &str) -> bool {
        self.core.should_log(path, method)
    }
}

impl HttpMiddleware for ConsoleLogger {
    fn wrap(&self, inner: ArcHandler) -> ArcHandler {
        Arc::new(Logged {
            core: self.core.clone(),
            inner,
        })
    }
}

struct Logged {
    core: Arc<Core>,
    inner: ArcHandler,
}

#[async_trait]
impl RouteHandler for Logged {
    async fn call(&self, req: HttpRequest) -> HttpResponse {
        let path = req.uri().path().to_string();
        let method = req.method().as_str().to_string();
        if !self.core.should_log(&path, &method) {
            return self.inner.call(req).await;
        }

        let fields = self.core.fields;
        let mut record = Map::new();
        if fields.method {
            record.insert("method".into(), json!(method));
        }
        if fields.path {
            record.insert("path".into(), json!(path));
        }
        if fields.client_ip {
            record.insert("client_ip".into(), json!(client_ip(&req)));
        }
        if fields.query {
            record.insert("query".into(), json!(req.uri().query().unwrap_or("")));
        }
        if fields.protocol {
            record.insert("protocol".into(), json!(format!("{:?}", req.version())));
        }
        if fields.host {
            let host = req
                .headers()
                .get("host")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("");
            record.insert("host".into(), json!(host));
        }
        if fields.user_agent {
            let agent = req
                .headers()
                .get("user-agent")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("");
            record.insert("user_agent".into(), json!(agent));
        }

        let started = Instant::now();
        let resp = self.inner.call(req).await;
        if fields.status {
            record.insert("status".into(), json!(resp.status().as_u16()));
        }
        if fields.duration {
            record.insert(
                "duration_ms".into(),
                json!(started.elapsed().as_secs_f64() * 1000.0),
            );
        }
        self.core.emit(&record);
        resp
    }
}
