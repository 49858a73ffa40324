#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use reqwest::StatusCode;
use serde_json::{json, Value};

pub const XP_API_KEY: &str = "test-key";

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    /// Spawn the server binary on a free port with an in-memory store.
    /// `configure` receives the server's own base URL and returns extra env vars.
    fn spawn(configure: impl FnOnce(&str) -> Vec<(&'static str, String)>) -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_mentiby-admin"));
        cmd.env_clear()
            .env("MENTIBY_PORT", port.to_string())
            .env("RUST_LOG", "warn")
            .env("XP_REQUEST_DELAY_MS", "0")
            .env("XP_RATE_LIMIT_COOLDOWN_SECS", "0")
            .envs(configure(&base_url))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub async fn start_server(configure: impl FnOnce(&str) -> Vec<(&'static str, String)>) -> Result<TestServer> {
    let server = TestServer::spawn(configure)?;
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// Serve a router on a free local port for the rest of the test
pub async fn serve_fake(router: Router) -> Result<String> {
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://127.0.0.1:{}", port))
}

#[derive(Clone, Default)]
pub struct Hits(pub Arc<AtomicUsize>);

impl Hits {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// XP provider stand-in: 418 XP for a@x.com, 7 for b@x.com, "not_found" for anyone else
pub async fn fake_xp_provider() -> Result<(String, Hits)> {
    async fn lookup(State(hits): State<Hits>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        hits.0.fetch_add(1, Ordering::SeqCst);
        if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some(XP_API_KEY) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
        }
        let output = match body["email"].as_str() {
            Some("a@x.com") => json!({"status": "ok", "data": {"cumulativeXpAllTime": 418}}),
            Some("b@x.com") => json!({"status": "ok", "data": {"cumulativeXpAllTime": 7}}),
            Some("limited@x.com") => return (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "slow down"}))),
            _ => json!({"status": "not_found"}),
        };
        (StatusCode::OK, Json(json!([{ "output": output }])))
    }

    let hits = Hits::default();
    let router = Router::new().route("/xp", post(lookup)).with_state(hits.clone());
    let base = serve_fake(router).await?;
    Ok((format!("{}/xp", base), hits))
}

/// One tab-separated participant row with name, duration and roll number in place
pub fn report_row(name: &str, duration: &str, roll: &str) -> String {
    let mut columns = vec![""; 13];
    columns[0] = name;
    columns[3] = duration;
    columns[12] = roll;
    columns.join("\t")
}

pub fn sample_report() -> String {
    [
        "1. Summary".to_string(),
        "Meeting duration\t1h 40m".to_string(),
        String::new(),
        "2. Participants".to_string(),
        "Name\tFirst Join\tLast Leave\tIn-Meeting Duration".to_string(),
        report_row("Asha Rao 25MBY3001", "50m", ""),
        report_row("Ravi", "4m 10s", "25MBY3002"),
        report_row("Asha Rao 25MBY3001", "10m", ""),
    ]
    .join("\n")
}

/// Multipart upload form with every field filled in; `skip` leaves one field out
pub fn upload_form(csv: String, date: &str, skip: Option<&str>) -> Result<reqwest::multipart::Form> {
    let file = reqwest::multipart::Part::bytes(csv.into_bytes())
        .file_name("report.csv")
        .mime_str("text/csv")?;
    let fields = [
        ("cohort_type", "Basic"),
        ("cohort_number", "3"),
        ("subject", "DSA"),
        ("class_date", date),
        ("teacher_name", "Ms. Rao"),
    ];
    Ok(fields
        .into_iter()
        .filter(|(name, _)| Some(*name) != skip)
        .fold(reqwest::multipart::Form::new().part("csv_file", file), |form, (name, value)| {
            form.text(name, value.to_string())
        }))
}
