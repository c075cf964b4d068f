//! Shared test fixtures: an in-process stub game back-end and an in-memory
//! repo.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use slot_stress::chart::Point;
use slot_stress::data::{DataError, OrderAggregate, OrderScope, StressRepo};
use slot_stress::player::PlayerInfo;

/// Scriptable stub of the game back-end wire protocol.
#[derive(Default)]
pub struct Backend {
    pub launches: AtomicU64,
    pub logins: AtomicU64,
    pub bets: AtomicU64,
    pub bonuses: AtomicU64,

    /// Queued raw envelopes; the default when drained is a clean spin-over.
    pub bet_script: Mutex<VecDeque<Value>>,
    pub bonus_script: Mutex<VecDeque<Value>>,
}

impl Backend {
    pub fn push_bet(&self, envelope: Value) {
        self.bet_script.lock().push_back(envelope);
    }

    pub fn push_bonus(&self, envelope: Value) {
        self.bonus_script.lock().push_back(envelope);
    }
}

async fn launch(State(state): State<Arc<Backend>>) -> Json<Value> {
    let n = state.launches.fetch_add(1, Ordering::SeqCst) + 1;
    // URL-encoded redirect; the embedded token carries a literal '+'
    let url = format!("https%3A%2F%2Fgame.local%2Fplay%3Ftoken%3Dtok%2B{n}%26lang%3Den");
    Json(json!({"code": 0, "msg": "", "data": {"launchUrl": url}}))
}

async fn login(State(state): State<Arc<Backend>>, Json(body): Json<Value>) -> Json<Value> {
    state.logins.fetch_add(1, Ordering::SeqCst);
    let token = body.get("token").and_then(Value::as_str).unwrap_or("");
    if !token.starts_with("tok+") {
        return Json(json!({"code": 2, "msg": "bad launch token", "data": null}));
    }
    Json(json!({
        "code": 0,
        "msg": "",
        "data": {"token": format!("sess-{token}"), "freeData": {}},
    }))
}

async fn bet_order(
    State(state): State<Arc<Backend>>,
    headers: axum::http::HeaderMap,
    Json(_body): Json<Value>,
) -> Json<Value> {
    state.bets.fetch_add(1, Ordering::SeqCst);
    let token = headers
        .get("x-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !token.starts_with("sess-") {
        return Json(json!({"code": 100, "msg": "invalid token", "data": null}));
    }
    if let Some(scripted) = state.bet_script.lock().pop_front() {
        return Json(scripted);
    }
    Json(json!({"code": 0, "msg": "", "data": {"isSpinOver": true}}))
}

async fn bet_bonus(State(state): State<Arc<Backend>>, Json(_body): Json<Value>) -> Json<Value> {
    state.bonuses.fetch_add(1, Ordering::SeqCst);
    if let Some(scripted) = state.bonus_script.lock().pop_front() {
        return Json(scripted);
    }
    Json(json!({"code": 0, "msg": "", "data": {}}))
}

/// Bind the stub on an ephemeral port and serve it in the background.
pub async fn spawn_backend() -> (SocketAddr, Arc<Backend>) {
    let state = Arc::new(Backend::default());
    let router = Router::new()
        .route("/v1/game/launch", post(launch))
        .route("/api/member/login", post(login))
        .route("/api/game/betorder", post(bet_order))
        .route("/api/game/betbonus", post(bet_bonus))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub backend");
    let addr = listener.local_addr().expect("stub backend addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, state)
}

/// In-memory repo: enough behavior for scheduler/executor flows without
/// MySQL or Redis.
pub struct MemRepo {
    pub next_player_id: AtomicI64,
    pub task_counter: AtomicI64,
    /// What `order_count` answers; i64::MAX makes settlement instant.
    pub order_rows: AtomicI64,
    pub aggregate: Mutex<OrderAggregate>,
    pub stakes: Mutex<HashMap<i64, Vec<f64>>>,
    pub cleaned_sites: AtomicU64,
    pub deleted_scopes: AtomicU64,
}

impl Default for MemRepo {
    fn default() -> Self {
        Self {
            next_player_id: AtomicI64::new(1),
            task_counter: AtomicI64::new(0),
            order_rows: AtomicI64::new(i64::MAX),
            aggregate: Mutex::new(OrderAggregate::default()),
            stakes: Mutex::new(HashMap::new()),
            cleaned_sites: AtomicU64::new(0),
            deleted_scopes: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl StressRepo for MemRepo {
    async fn batch_upsert_players(&self, players: &mut Vec<PlayerInfo>) -> Result<(), DataError> {
        for p in players.iter_mut() {
            p.id = self.next_player_id.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn load_stake_sets(
        &self,
        game_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<f64>>, DataError> {
        let stakes = self.stakes.lock();
        Ok(game_ids
            .iter()
            .filter_map(|id| stakes.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    async fn next_task_id(&self, game_id: i64) -> Result<String, DataError> {
        let n = self.task_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("20260801-{game_id}-{n}"))
    }

    async fn order_count(&self, _scope: &OrderScope) -> Result<i64, DataError> {
        Ok(self.order_rows.load(Ordering::SeqCst))
    }

    async fn order_aggregate(&self, _scope: &OrderScope) -> Result<OrderAggregate, DataError> {
        Ok(*self.aggregate.lock())
    }

    async fn delete_orders(&self, _scope: &OrderScope) -> Result<u64, DataError> {
        self.deleted_scopes.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn truncate_orders(&self) -> Result<(), DataError> {
        Ok(())
    }

    async fn sample_order_points(&self, _scope: &OrderScope) -> Result<Vec<Point>, DataError> {
        Ok(Vec::new())
    }

    async fn clean_sites(&self, sites: &[String]) -> Result<(), DataError> {
        self.cleaned_sites
            .fetch_add(sites.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}
