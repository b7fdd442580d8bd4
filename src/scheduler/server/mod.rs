// SPDX-License-Identifier: MIT

//! HTTP control surface
//!
//! Trigger and kill workflows, read dag snapshots, and stream node
//! transitions as server-sent events.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::core::error::FlowError;
use crate::scheduler::flow::executor::{FlowJobExecutor, ProcessOutcome, Trigger};
use crate::scheduler::flow::types::JobKey;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<FlowJobExecutor>,
    pub scheduler_name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/flows", get(list_flows))
        .route("/api/flows/{group}/{name}", get(get_flow))
        .route("/api/flows/{group}/{name}/trigger", post(trigger_flow))
        .route("/api/flows/{group}/{name}/kill", post(kill_flow))
        .route(
            "/api/flows/{group}/{name}/nodes/{node_group}/{node_name}/kill",
            post(kill_node),
        )
        .route("/api/events", get(stream_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(port: u16, state: AppState) -> Result<(), FlowError> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Maps [`FlowError`] onto an HTTP status with a JSON body
pub struct ApiError(FlowError);

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FlowError::DefinitionNotFound(_) => StatusCode::NOT_FOUND,
            FlowError::Graph(_) | FlowError::Yaml(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_flows(State(state): State<AppState>) -> Json<Value> {
    let dags = state.executor.instances().await;
    let flows: Vec<Value> = dags
        .iter()
        .map(|dag| {
            json!({
                "dag_id": dag.id(),
                "workflow": dag.job_key().to_string(),
                "status": dag.status(),
            })
        })
        .collect();
    Json(json!(flows))
}

async fn get_flow(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let key = JobKey::new(group, name);
    match state.executor.instance(&key).await {
        Some(dag) => Ok(Json(json!(dag.snapshot()))),
        None => Err(FlowError::definition_not_found(key.to_string()).into()),
    }
}

async fn trigger_flow(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let trigger = Trigger::now(JobKey::new(group, name), state.scheduler_name.clone());
    let outcome = state.executor.process(trigger).await?;
    let (code, label) = match &outcome {
        ProcessOutcome::Started(_) => (StatusCode::ACCEPTED, "started"),
        ProcessOutcome::DuplicateSuppressed(_) => (StatusCode::CONFLICT, "duplicate_suppressed"),
    };
    Ok((
        code,
        Json(json!({ "outcome": label, "dag_id": outcome.dag().id() })),
    ))
}

async fn kill_flow(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    let key = JobKey::new(group, name);
    match state.executor.kill(&key).await {
        Some(dag) => (
            StatusCode::ACCEPTED,
            Json(json!({ "killed": true, "dag_id": dag.id() })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "killed": false, "error": format!("No running dag for {}", key) })),
        ),
    }
}

async fn kill_node(
    State(state): State<AppState>,
    Path((group, name, node_group, node_name)): Path<(String, String, String, String)>,
) -> (StatusCode, Json<Value>) {
    let key = JobKey::new(group, name);
    if state
        .executor
        .kill_node(&key, &node_group, &node_name)
        .await
    {
        (StatusCode::ACCEPTED, Json(json!({ "killed": true })))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "killed": false })))
    }
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.executor.subscribe()).filter_map(|item| match item {
        Ok(transition) => Event::default().json_data(transition).ok().map(Ok),
        Err(e) => {
            log::warn!("Event stream lagged: {}", e);
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(1)))
}
