//! The Plan HTTP Surface (C7): `POST /plan`, `GET /plan/:id/events`
//! (SSE or JSON snapshot per `Accept`), `POST /plan/:id/steps/:id/approve`,
//! and an ambient `/healthz` (spec §4.7, §6).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use plan_contracts::approval::ApprovalRequest;
use plan_contracts::error::EngineError;
use plan_contracts::event::StepEvent;
use plan_contracts::plan::Plan;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/plan", post(submit_plan))
        .route("/plan/:id/events", get(plan_events))
        .route("/plan/:plan_id/steps/:step_id/approve", post(approve_step))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SubmitPlanRequest {
    goal: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitPlanResponse {
    plan: Plan,
    trace_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn engine_error_response(err: EngineError) -> Response {
    let status = match err {
        EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
        EngineError::PolicyDenied { .. } => StatusCode::FORBIDDEN,
        EngineError::StepNotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        EngineError::EnqueueFailed { .. }
        | EngineError::PersistFailed { .. }
        | EngineError::ToolFailed { .. }
        | EngineError::ConfigError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}

/// `POST /plan` — validate, call the planner, submit to the engine.
async fn submit_plan(
    State(state): State<AppState>,
    Json(req): Json<SubmitPlanRequest>,
) -> Response {
    if req.goal.trim().is_empty() {
        return engine_error_response(EngineError::Validation { reason: "goal must not be empty".to_string() });
    }

    let plan = state.planner.plan(&req.goal);
    let trace_id = Uuid::new_v4().to_string();

    if let Err(e) = state.engine.submit_plan(&plan, &trace_id).await {
        return engine_error_response(e);
    }

    (StatusCode::CREATED, Json(SubmitPlanResponse { plan, trace_id })).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventsSnapshot {
    events: Vec<StepEvent>,
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// `GET /plan/:id/events` — SSE stream (history replay then live
/// subscription) when `Accept: text/event-stream`, otherwise a JSON
/// snapshot of retained history.
async fn plan_events(State(state): State<AppState>, Path(plan_id): Path<String>, headers: HeaderMap) -> Response {
    if wants_event_stream(&headers) {
        let mut response = sse_stream(&state, &plan_id).await.into_response();
        let out = response.headers_mut();
        out.insert(header::CACHE_CONTROL, "no-cache, no-transform".parse().unwrap());
        out.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        response
    } else {
        let events = state.engine.bus().history(&plan_id).await;
        Json(EventsSnapshot { events }).into_response()
    }
}

async fn sse_stream(state: &AppState, plan_id: &str) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Replay history first, then subscribe, per the bus's documented
    // "call history first" contract for a consistent-enough view.
    let history = state.engine.bus().history(plan_id).await;
    let rx = state.engine.bus().subscribe(plan_id).await;

    let replay = stream::iter(history).map(to_sse_event);
    let live = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Some(to_sse_event(event)),
        // Lagged subscriber: the client missed events. Dropping them here
        // is safe because a reconnect triggers a full history replay.
        Err(_) => None,
    });

    Sse::new(replay.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_millis(state.engine.sse_keep_alive_ms()))
            .text("keep-alive"),
    )
}

fn to_sse_event(event: StepEvent) -> Result<Event, Infallible> {
    let json = serde_json::to_string(&event).unwrap_or_default();
    Ok(Event::default().event("plan.step").data(json))
}

/// `POST /plan/:planId/steps/:stepId/approve`
async fn approve_step(
    State(state): State<AppState>,
    Path((plan_id, step_id)): Path<(String, String)>,
    Json(req): Json<ApprovalRequest>,
) -> Response {
    match state.engine.resolve_approval(&plan_id, &step_id, req.decision, req.rationale).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => engine_error_response(e),
    }
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
