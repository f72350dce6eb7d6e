use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use url::Url;

use judgewatch::plugins::registry::{ApiContext, EvaluationBackend, PluginRegistry};

/// One frame written to the live stream.
#[derive(Clone)]
pub enum Frame {
    Message(Value),
    Named(&'static str, String),
}

#[derive(Default)]
pub struct MockState {
    pub run_response: Option<(StatusCode, Value)>,
    pub status_responses: VecDeque<(StatusCode, Value)>,
    /// `None` answers the live endpoint with 404.
    pub stream_frames: Option<Vec<Frame>>,
    pub queue_ids: Vec<String>,
    pub runs: usize,
    pub status_requests: usize,
    pub stream_requests: usize,
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockService {
    pub addr: SocketAddr,
    pub state: Shared,
    _server: tokio::task::JoinHandle<()>,
}

impl MockService {
    pub async fn start(state: MockState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/queue/run", post(run))
            .route("/diagnostics/job_status", get(job_status))
            .route("/diagnostics/live_job_status", get(live_job_status))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, _server: server }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn backend(&self) -> Arc<dyn EvaluationBackend> {
        let ctx = ApiContext::new(Url::parse(&self.base_url()).unwrap());
        PluginRegistry::with_defaults().backend_for(&ctx).unwrap()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&MockState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }
}

pub fn counts(pending: u64, running: u64, done: u64, failed: u64, total: u64) -> Value {
    json!({
        "counts": { "pending": pending, "running": running, "done": done, "failed": failed },
        "total": total,
    })
}

fn record<'a>(state: &'a Shared, params: &HashMap<String, String>) -> std::sync::MutexGuard<'a, MockState> {
    let mut s = state.lock().unwrap();
    if let Some(q) = params.get("queue_id") {
        s.queue_ids.push(q.clone());
    }
    s
}

async fn run(State(state): State<Shared>, Query(params): Query<HashMap<String, String>>) -> Response {
    let mut s = record(&state, &params);
    s.runs += 1;
    let (status, body) = s
        .run_response
        .clone()
        .unwrap_or((StatusCode::OK, json!({ "enqueued": 0 })));
    (status, Json(body)).into_response()
}

async fn job_status(State(state): State<Shared>, Query(params): Query<HashMap<String, String>>) -> Response {
    let mut s = record(&state, &params);
    s.status_requests += 1;
    match s.status_responses.pop_front() {
        Some((status, body)) => (status, Json(body)).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "detail": "busy" }))).into_response(),
    }
}

async fn live_job_status(State(state): State<Shared>, Query(params): Query<HashMap<String, String>>) -> Response {
    let frames = {
        let mut s = record(&state, &params);
        s.stream_requests += 1;
        s.stream_frames.clone()
    };
    let Some(frames) = frames else {
        return (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" }))).into_response();
    };

    let events = frames.into_iter().map(|frame| {
        let event = match frame {
            Frame::Message(v) => Event::default().data(v.to_string()),
            Frame::Named(name, data) => Event::default().event(name).data(data),
        };
        Ok::<_, Infallible>(event)
    });
    Sse::new(futures::stream::iter(events)).into_response()
}
