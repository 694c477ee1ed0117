//! Local log file plus best-effort anonymous telemetry.
//!
//! Telemetry reports call *shape* only — never message content. Every emit
//! is fire-and-forget from a background thread: a slow or dead endpoint can
//! never block or fail a chat call.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use deskpilot_core::{Result, TelemetryConfig, runtime_dir};
use reqwest::blocking::Client;
use serde_json::json;

pub struct Observer {
    log_path: PathBuf,
    telemetry: Option<TelemetrySink>,
    verbose: bool,
}

struct TelemetrySink {
    endpoint: String,
    client: Client,
}

impl Observer {
    pub fn new(workspace: &Path, telemetry_cfg: &TelemetryConfig) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        let telemetry = telemetry_sink(telemetry_cfg)?;
        Ok(Self {
            log_path: dir.join("observe.log"),
            telemetry,
            verbose: false,
        })
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// A chat cycle started. Reports invocation shape, never content.
    pub fn started_chat(&self, mode: &str, input_kind: &str, auto_run: bool) {
        let _ = self.append_log_line(&format!(
            "{} CHAT mode={mode} input={input_kind} auto_run={auto_run}",
            Utc::now().to_rfc3339()
        ));
        self.emit(
            "started_chat",
            json!({
                "mode": mode,
                "input_kind": input_kind,
                "auto_run": auto_run,
            }),
        );
    }

    /// A chat cycle died on an uncaught error; reported before re-raising.
    pub fn errored(&self, error: &str, input_kind: &str, auto_run: bool) {
        let _ = self.append_log_line(&format!(
            "{} ERROR input={input_kind} auto_run={auto_run} error={error}",
            Utc::now().to_rfc3339()
        ));
        self.emit(
            "errored",
            json!({
                "error": error,
                "input_kind": input_kind,
                "auto_run": auto_run,
            }),
        );
    }

    /// Log to stderr with a `[deskpilot]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[deskpilot] {msg}");
        }
    }

    /// Warning — always written to the log file, and to stderr.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[deskpilot WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    fn emit(&self, name: &str, payload: serde_json::Value) {
        let Some(sink) = &self.telemetry else {
            return;
        };

        let body = json!({
            "name": name,
            "at": Utc::now().to_rfc3339(),
            "payload": payload,
        });

        // Fire-and-forget: the HTTP call runs on its own thread so it never
        // holds up the chat cycle, whatever the endpoint is doing.
        let client = sink.client.clone();
        let endpoint = sink.endpoint.clone();
        let log_path = self.log_path.clone();
        std::thread::spawn(move || {
            if let Err(err) = client.post(&endpoint).json(&body).send() {
                let line = format!("{} TELEMETRY_ERROR error={}", Utc::now().to_rfc3339(), err);
                let _ = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_path)
                    .and_then(|mut f| writeln!(f, "{line}"));
            }
        });
    }
}

fn telemetry_sink(cfg: &TelemetryConfig) -> Result<Option<TelemetrySink>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let Some(endpoint) = cfg.endpoint.clone() else {
        return Ok(None);
    };
    let client = Client::builder().timeout(Duration::from_secs(3)).build()?;
    Ok(Some(TelemetrySink { endpoint, client }))
}
