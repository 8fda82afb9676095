use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_client::{
    ArtifactExporter, DispatchOutcome, Dispatcher, HttpRemote, Poller, RemoteError, RemoteService,
};
use swarm_core::{
    CyclePhase, LogEntry, LogStream, Metric, PolicySource, RunStatus, SharedSnapshot,
    SnapshotField, SYSTEM_ROLE,
};

#[derive(Default)]
struct ServerState {
    citizen_logs: Vec<LogEntry>,
    senate_logs: Vec<LogEntry>,
    architect_logs: Vec<LogEntry>,
    metrics: Vec<Metric>,
    status: RunStatus,
    report: String,
    submitted: Vec<String>,
    uploads: Vec<(String, String)>,
    fail_metrics: bool,
    fast_demo: bool,
}

type Shared = Arc<Mutex<ServerState>>;

struct FakeServer {
    addr: SocketAddr,
    state: Shared,
}

impl FakeServer {
    async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(ServerState::default()));
        let app = Router::new()
            .route("/citizen-logs", get(citizen_logs))
            .route("/senate-logs", get(senate_logs))
            .route("/architect-logs", get(architect_logs))
            .route("/metrics", get(metrics))
            .route("/status", get(status))
            .route("/report", get(report))
            .route("/agents", get(agents))
            .route("/config", get(config).post(update_config))
            .route("/api/submit-policy", post(submit_policy))
            .route("/api/upload-policy", post(upload_policy))
            .route("/api/pause-cycle", post(pause_cycle))
            .route("/api/continue-cycle", post(continue_cycle))
            .route("/api/stop-and-download", post(stop_and_download))
            .route("/api/download-policy", get(download_policy))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn with<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let mut state = self.state.lock().expect("server state");
        f(&mut state)
    }
}

async fn citizen_logs(State(state): State<Shared>) -> Json<Vec<LogEntry>> {
    Json(state.lock().unwrap().citizen_logs.clone())
}

async fn senate_logs(State(state): State<Shared>) -> Json<Vec<LogEntry>> {
    Json(state.lock().unwrap().senate_logs.clone())
}

async fn architect_logs(State(state): State<Shared>) -> Json<Vec<LogEntry>> {
    Json(state.lock().unwrap().architect_logs.clone())
}

async fn metrics(State(state): State<Shared>) -> Response {
    let state = state.lock().unwrap();
    if state.fail_metrics {
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics offline").into_response();
    }
    Json(state.metrics.clone()).into_response()
}

async fn status(State(state): State<Shared>) -> Json<RunStatus> {
    Json(state.lock().unwrap().status)
}

async fn report(State(state): State<Shared>) -> Json<Value> {
    Json(json!({ "report": state.lock().unwrap().report }))
}

async fn agents() -> Json<Value> {
    Json(json!([
        {"name": "Sarah", "role": "Single Mom", "background": "Works two jobs.", "traits": ["frugal"]},
        {"name": "Strategy Lead", "role": "Economic Viability"}
    ]))
}

fn config_body(fast_demo: bool) -> Value {
    if fast_demo {
        json!({"fast_demo": true, "max_exchanges": 25, "max_senate_exchanges": 5})
    } else {
        json!({"fast_demo": false, "max_exchanges": 100, "max_senate_exchanges": 10})
    }
}

async fn config(State(state): State<Shared>) -> Json<Value> {
    Json(config_body(state.lock().unwrap().fast_demo))
}

async fn update_config(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let fast = query.get("fast_demo").map(|v| v == "true").unwrap_or(false);
    state.lock().unwrap().fast_demo = fast;
    Json(json!({"status": "success", "config": config_body(fast)}))
}

async fn submit_policy(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.submitted.push(query.get("policy").cloned().unwrap_or_default());
    state.status = RunStatus::default();
    state.report.clear();
    Json(json!({"status": "started"}))
}

async fn upload_policy(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let filename = query.get("filename").cloned().unwrap_or_default();
    if !filename.ends_with(".md") {
        return Json(json!({"status": "error", "message": "unsupported file"}));
    }
    let content = query.get("file").cloned().unwrap_or_default();
    state.lock().unwrap().uploads.push((filename, content));
    Json(json!({"status": "started"}))
}

async fn pause_cycle(State(state): State<Shared>) -> Json<Value> {
    state.lock().unwrap().status.paused = true;
    Json(json!({"status": "paused"}))
}

async fn continue_cycle(State(state): State<Shared>) -> Json<Value> {
    state.lock().unwrap().status.paused = false;
    Json(json!({"status": "resumed"}))
}

async fn stop_and_download(State(state): State<Shared>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.status.complete = true;
    state.status.paused = false;
    Json(json!({"policy": state.report}))
}

async fn download_policy(State(state): State<Shared>) -> Response {
    let report = state.lock().unwrap().report.clone();
    ([(header::CONTENT_TYPE, "text/markdown")], report).into_response()
}

fn entry(agent: &str, role: &str, message: &str) -> LogEntry {
    LogEntry::new(agent, role, message)
}

struct Client {
    store: SharedSnapshot,
    dispatcher: Dispatcher,
    poller: Poller,
    _dir: tempfile::TempDir,
    export_dir: std::path::PathBuf,
}

fn client(server: &FakeServer) -> Client {
    let dir = tempfile::tempdir().expect("tempdir");
    let export_dir = dir.path().to_path_buf();
    let remote: Arc<dyn RemoteService> = Arc::new(HttpRemote::new(server.url()));
    let store = SharedSnapshot::new();
    let dispatcher = Dispatcher::new(
        remote.clone(),
        store.clone(),
        ArtifactExporter::to_directory(&export_dir),
    );
    let poller = Poller::new(remote, store.clone(), Duration::from_millis(50));
    Client {
        store,
        dispatcher,
        poller,
        _dir: dir,
        export_dir,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_run_from_submit_to_export() {
    let server = FakeServer::start().await;
    let c = client(&server);

    c.poller.poll_once().await;
    assert_eq!(c.store.phase(), CyclePhase::Ready);

    let sent = c.dispatcher.submit_text("Replace X with Y").await.unwrap();
    assert_eq!(sent, DispatchOutcome::Sent(swarm_core::ControlAction::Submit));
    assert_eq!(c.store.phase(), CyclePhase::Running);
    assert_eq!(server.with(|s| s.submitted.clone()), vec!["Replace X with Y"]);

    server.with(|s| {
        s.status.iteration = 1;
        s.citizen_logs = vec![
            entry("System", SYSTEM_ROLE, "--- Iteration 1/3 ---"),
            entry("Sarah", "Single Mom", "What does Y cost me?"),
            entry("Jamal", "Teacher", "Y helps my students."),
        ];
        s.metrics = vec![Metric {
            iteration: 1,
            citizen_score: 48.0,
            senate_score: 61.5,
        }];
    });
    c.poller.poll_once().await;
    {
        let store = c.store.lock();
        assert_eq!(store.phase(), CyclePhase::Running);
        let visible: Vec<_> = store
            .logs(LogStream::Citizen)
            .iter()
            .filter(|e| !e.is_system())
            .collect();
        assert_eq!(visible.len(), 2);
        assert_eq!(store.latest_metric().map(|m| m.senate_score), Some(61.5));
    }

    c.dispatcher.pause().await.unwrap();
    c.poller.poll_once().await;
    assert_eq!(c.store.phase(), CyclePhase::Paused);

    c.dispatcher.resume().await.unwrap();
    c.poller.poll_once().await;
    assert_eq!(c.store.phase(), CyclePhase::Running);

    let final_policy = "# Final Policy\n\nReplace X with Y, phased over 3 years.\n";
    server.with(|s| {
        s.status = RunStatus {
            iteration: 3,
            paused: false,
            complete: true,
        };
        s.report = final_policy.to_string();
    });
    let report = c.poller.poll_once().await;
    assert!(report.run_finished);
    assert_eq!(c.store.phase(), CyclePhase::Complete);
    assert_eq!(c.store.lock().artifact().as_bytes(), final_policy.as_bytes());

    let DispatchOutcome::Exported { path, .. } = c.dispatcher.export().await.unwrap() else {
        panic!("export should write a file");
    };
    assert!(path.starts_with(&c.export_dir));
    assert_eq!(std::fs::read(path).unwrap(), final_policy.as_bytes());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_and_export_matches_completed_download() {
    let server = FakeServer::start().await;
    let report = "# Final Policy\r\n\n- keep exact bytes\n";

    let completed = client(&server);
    server.with(|s| {
        s.status = RunStatus {
            iteration: 3,
            paused: false,
            complete: true,
        };
        s.report = report.to_string();
    });
    completed.poller.poll_once().await;
    let DispatchOutcome::Exported { path: downloaded, .. } =
        completed.dispatcher.export().await.unwrap()
    else {
        panic!("export should write a file");
    };

    let stopped = client(&server);
    server.with(|s| {
        s.status = RunStatus {
            iteration: 2,
            paused: true,
            complete: false,
        };
    });
    stopped.poller.poll_once().await;
    assert_eq!(stopped.store.phase(), CyclePhase::Paused);
    let DispatchOutcome::Exported { path: terminated, .. } =
        stopped.dispatcher.stop_and_export().await.unwrap()
    else {
        panic!("stop-and-export should write a file");
    };

    assert_eq!(
        std::fs::read(downloaded).unwrap(),
        std::fs::read(terminated).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_metrics_keep_previous_series() {
    let server = FakeServer::start().await;
    let c = client(&server);
    server.with(|s| {
        s.status.iteration = 1;
        s.metrics = vec![Metric {
            iteration: 1,
            citizen_score: 40.0,
            senate_score: 50.0,
        }];
    });
    c.poller.poll_once().await;

    server.with(|s| {
        s.fail_metrics = true;
        s.status.iteration = 2;
        s.senate_logs = vec![entry("Strategy Lead", "Economic Viability", "Costly.")];
    });
    let report = c.poller.poll_once().await;

    assert_eq!(report.missing, vec![SnapshotField::Metrics]);
    let store = c.store.lock();
    assert_eq!(store.metrics().len(), 1);
    assert_eq!(store.status().iteration, 2);
    assert_eq!(store.logs(LogStream::Senate).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_rejection_reverts_to_ready() {
    let server = FakeServer::start().await;
    let c = client(&server);

    let rejected = PolicySource::file("notes.txt", b"plain".to_vec()).unwrap();
    let err = c.dispatcher.submit(rejected).await.unwrap_err();
    assert!(err.to_string().contains("unsupported file"));
    assert_eq!(c.store.phase(), CyclePhase::Ready);

    let accepted = PolicySource::file("housing.md", b"# Housing".to_vec()).unwrap();
    c.dispatcher.submit(accepted).await.unwrap();
    assert_eq!(
        server.with(|s| s.uploads.clone()),
        vec![("housing.md".to_string(), "# Housing".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_poller_applies_nothing() {
    let server = FakeServer::start().await;
    let c = client(&server);
    let handle = c.poller.spawn();
    handle.stop().await;

    server.with(|s| {
        s.status.iteration = 2;
        s.citizen_logs = vec![entry("Sarah", "Single Mom", "Hello")];
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    let store = c.store.lock();
    assert!(store.logs(LogStream::Citizen).is_empty());
    assert_eq!(store.status().iteration, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn config_and_agents_round_trip() {
    let server = FakeServer::start().await;
    let c = client(&server);

    let agents = c.dispatcher.agents().await.unwrap();
    assert_eq!(agents.len(), 2);
    assert!(agents[1].traits.is_empty());

    let config = c.dispatcher.set_fast_mode(true).await.unwrap();
    assert!(config.fast_demo);
    assert_eq!(config.max_senate_exchanges, 5);
    assert!(c.dispatcher.fetch_config().await.unwrap().fast_demo);
}

#[tokio::test]
async fn unreachable_remote_is_an_error() {
    let remote = HttpRemote::new("http://127.0.0.1:9");
    let err = remote.status().await.unwrap_err();
    assert!(matches!(err, RemoteError::Http(_)));
}
