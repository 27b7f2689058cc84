// HTTP surface - webhook, liveness and status endpoints

use axum::{
    extract::{FromRequest, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::gateway::InboundMessage;
use crate::journal::{self, Journal};
use crate::scheduler::{ScheduleEntry, Scheduler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub journal: Journal,
    pub started: Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, scheduler: Arc<Scheduler>, journal: Journal) -> Self {
        AppState {
            dispatcher,
            scheduler,
            journal,
            started: Instant::now(),
        }
    }

    fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

#[derive(Serialize)]
struct Ack {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize)]
struct Ping {
    status: &'static str,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct LastError {
    at: String,
    kind: String,
    subject: String,
    error: serde_json::Value,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    last_successful_send: Option<String>,
    last_error: Option<LastError>,
    schedule: Vec<ScheduleEntry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/ping", get(ping))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /webhook - one inbound gateway message (JSON or form-encoded)
async fn webhook(State(state): State<AppState>, request: Request) -> Response {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    let parsed = if is_form {
        Form::<InboundMessage>::from_request(request, &())
            .await
            .map(|Form(msg)| msg)
            .map_err(|e| e.body_text())
    } else {
        Json::<InboundMessage>::from_request(request, &())
            .await
            .map(|Json(msg)| msg)
            .map_err(|e| e.body_text())
    };

    let msg = match parsed {
        Ok(msg) => msg,
        Err(reason) => {
            tracing::warn!(%reason, "Unreadable webhook payload");
            let ack = Ack {
                status: "error",
                message: Some(reason),
            };
            return (StatusCode::BAD_REQUEST, Json(ack)).into_response();
        }
    };

    let outcome = state.dispatcher.handle(msg).await;
    let code = match outcome {
        DispatchOutcome::Rejected => StatusCode::FORBIDDEN,
        _ => StatusCode::OK,
    };
    let ack = Ack {
        status: outcome.status(),
        message: None,
    };

    (code, Json(ack)).into_response()
}

/// GET /ping - liveness for uptime monitors
async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    Json(Ping {
        status: "ok",
        uptime_secs: state.uptime_secs(),
    })
}

/// GET /status - process health summary
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let last_successful_send = match state.journal.last(journal::MESSAGE_SENT) {
        Ok(event) => event.map(|e| e.timestamp.to_rfc3339()),
        Err(e) => {
            tracing::warn!(error = %e, "Journal read failed");
            None
        }
    };

    let last_error = [journal::PIPELINE_ERROR, journal::SEND_FAILED]
        .into_iter()
        .filter_map(|kind| state.journal.last(kind).ok().flatten())
        .max_by_key(|event| event.timestamp)
        .map(|event| LastError {
            at: event.timestamp.to_rfc3339(),
            kind: event.event_type,
            subject: event.subject,
            error: event.data.get("error").cloned().unwrap_or_default(),
        });

    Json(StatusResponse {
        status: "ok",
        version: crate::VERSION,
        uptime_secs: state.uptime_secs(),
        last_successful_send,
        last_error,
        schedule: state.scheduler.schedule_info(),
    })
}
