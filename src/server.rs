//! Control API: thin axum glue over the coordinator.
//!
//! Every reply wears the `{code, message, data}` envelope; `code` 0 is
//! success and each structured failure has its own non-zero code.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::{Coordinator, CoordinatorError};
use crate::metrics;
use crate::report::short_duration;
use crate::task::{Task, TaskConfig};

pub const CODE_OK: i64 = 0;
pub const CODE_GAME_NOT_FOUND: i64 = 1001;
pub const CODE_INVALID_STAKE: i64 = 1002;
pub const CODE_TASK_NOT_FOUND: i64 = 1003;
pub const CODE_INTERNAL: i64 = 1005;

type AppState = Arc<Coordinator>;

fn ok(data: Value) -> Json<Value> {
    Json(json!({"code": CODE_OK, "message": "", "data": data}))
}

fn fail(err: &CoordinatorError) -> Json<Value> {
    let code = match err {
        CoordinatorError::GameNotFound(_) => CODE_GAME_NOT_FOUND,
        CoordinatorError::InvalidStake { .. } => CODE_INVALID_STAKE,
        CoordinatorError::TaskNotFound(_) => CODE_TASK_NOT_FOUND,
        CoordinatorError::Task(_) | CoordinatorError::Data(_) => CODE_INTERNAL,
    };
    Json(json!({"code": code, "message": err.to_string(), "data": null}))
}

/// Task snapshot as the API exposes it.
fn task_json(task: &Arc<Task>) -> Value {
    let r = task.snapshot(chrono::Utc::now());
    json!({
        "task_id": r.task_id,
        "game_id": r.game_id,
        "game_name": r.game_name,
        "status": r.status,
        "process": r.process,
        "target": r.target,
        "step": r.step,
        "progress_pct": r.progress_pct,
        "qps": r.qps,
        "elapsed": short_duration(r.elapsed),
        "avg_latency": short_duration(r.avg_latency),
        "active_members": r.active_members,
        "completed_members": r.completed_members,
        "failed_members": r.failed_members,
        "failed_requests": r.failed_requests,
        "created_at": task.created_at().to_rfc3339(),
        "start_at": task.start_at().map(|t| t.to_rfc3339()),
        "finish_at": task.finish_at().map(|t| t.to_rfc3339()),
        "record_url": r.record_url,
    })
}

pub fn router(coordinator: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .route("/v1/games", get(list_games))
        .route("/v1/tasks", post(create_task).get(list_tasks))
        .route("/v1/tasks/:id", get(task_info).delete(delete_task))
        .route("/v1/tasks/:id/cancel", post(cancel_task))
        .route("/v1/tasks/:id/record", get(get_record))
        .route("/v1/bench", post(bench))
        .with_state(coordinator)
}

/// Serve the control API until shutdown.
pub async fn serve(
    addr: &str,
    coordinator: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "control api listening");
    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text() -> String {
    metrics::gather()
}

async fn list_games(State(c): State<AppState>) -> Json<Value> {
    let games: Vec<Value> = c
        .games()
        .iter()
        .map(|g| {
            json!({
                "game_id": g.game_id(),
                "game_name": g.name(),
                "bet_size": g.stakes(),
            })
        })
        .collect();
    ok(json!({"games": games, "total": games.len()}))
}

async fn create_task(State(c): State<AppState>, Json(config): Json<TaskConfig>) -> Json<Value> {
    match c.create_task(config).await {
        Ok(task) => ok(json!({"task": task_json(&task)})),
        Err(err) => fail(&err),
    }
}

async fn list_tasks(State(c): State<AppState>) -> Json<Value> {
    let tasks: Vec<Value> = c.list_tasks().iter().map(task_json).collect();
    ok(json!({"tasks": tasks, "total": tasks.len()}))
}

async fn task_info(State(c): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    match c.get_task(&id) {
        Ok(task) => ok(json!({"task": task_json(&task)})),
        Err(err) => fail(&err),
    }
}

async fn cancel_task(State(c): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    match c.cancel_task(&id) {
        Ok(()) => ok(Value::Null),
        Err(err) => fail(&err),
    }
}

async fn delete_task(State(c): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    match c.delete_task(&id) {
        Ok(()) => ok(Value::Null),
        Err(err) => fail(&err),
    }
}

async fn get_record(State(c): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    match c.record_url(&id) {
        Ok(url) => ok(json!({"url": url})),
        Err(err) => fail(&err),
    }
}

#[derive(Debug, Deserialize)]
struct BenchRequest {
    #[serde(default)]
    game_ids: Vec<i64>,
    member_count: u32,
    times_per_member: u32,
}

async fn bench(State(c): State<AppState>, Json(req): Json<BenchRequest>) -> Json<Value> {
    let (task_ids, fails) = c
        .bench(&req.game_ids, req.member_count, req.times_per_member)
        .await;
    ok(json!({"task_ids": task_ids, "fails": fails}))
}
