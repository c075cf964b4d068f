//! Session scenarios driven through the real API client against an
//! in-process stub back-end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use slot_stress::client::{ApiClient, ApiError, ClientTargets, GameApi};
use slot_stress::game::builtin::{ChainBonusSlot, FlagSlot};
use slot_stress::game::{Game, GameBehavior, GameError, ResponseDecoder};
use slot_stress::session::{Session, SessionEnv, SessionState};
use slot_stress::task::{BetBonusConfig, BetOrderConfig, TaskConfig, TaskStats};

fn task_config(game_id: i64, member_count: u32, times: u32) -> TaskConfig {
    TaskConfig {
        game_id,
        description: String::new(),
        merchant: String::new(),
        member_count,
        times_per_member: times,
        bet_order: BetOrderConfig {
            base_money: 0.2,
            multiple: 1,
            purchase: 0,
        },
        bet_bonus: None,
        sign_required: false,
        launch_url: String::new(),
        api_url: String::new(),
    }
}

fn client_for(
    addr: std::net::SocketAddr,
    behavior: Arc<dyn GameBehavior>,
    config: TaskConfig,
) -> (ApiClient, Arc<Game>, Arc<TaskConfig>) {
    let base = format!("http://{addr}");
    let targets = ClientTargets::new(&base, &base, "default".to_string(), false, String::new());
    let game = Arc::new(Game::new(behavior));
    let config = Arc::new(config);
    let client = ApiClient::new(
        config.member_count as usize,
        targets,
        Arc::clone(&config),
        Arc::clone(&game),
    )
    .expect("client builds");
    (client, game, config)
}

fn env_for(game: &Arc<Game>, k: i64, bonus: Option<BetBonusConfig>) -> SessionEnv {
    SessionEnv::new(
        Arc::clone(game),
        Arc::new(TaskStats::new(k)),
        CancellationToken::new(),
        k,
        bonus,
    )
}

/// Happy path: every bet is spin-over, two members, three rounds each.
#[tokio::test]
async fn happy_path_completes_all_rounds() {
    let (addr, backend) = common::spawn_backend().await;
    let (client, game, _cfg) = client_for(
        addr,
        Arc::new(FlagSlot::new(18904, "Pharaoh Returns")),
        task_config(18904, 2, 3),
    );
    let env = env_for(&game, 3, None);

    for name in ["alice", "bob"] {
        let mut session = Session::new(name);
        session.run(&client, &env).await;
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.rounds_done(), 3);
    }

    assert_eq!(env.stats.process(), 6);
    assert_eq!(env.stats.step(), 6);
    assert_eq!(backend.launches.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(backend.logins.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(backend.bets.load(std::sync::atomic::Ordering::SeqCst), 6);
    assert_eq!(env.stats.errors(), 0);
}

/// Bonus chain: the first bet trips a mandatory bonus selection that
/// chains once before play returns to betting.
#[tokio::test]
async fn bonus_chain_returns_to_betting() {
    let (addr, backend) = common::spawn_backend().await;
    backend.push_bet(json!({
        "code": 0, "msg": "",
        "data": {"isSpinOver": false, "nextState": 11},
    }));
    backend.push_bonus(json!({
        "code": 0, "msg": "",
        "data": {"state": 11, "nextState": 0},
    }));
    backend.push_bonus(json!({
        "code": 0, "msg": "",
        "data": {"state": 11, "nextState": 4},
    }));

    let (client, game, _cfg) = client_for(
        addr,
        Arc::new(ChainBonusSlot::new(18902, "Poseidon Power")),
        task_config(18902, 1, 2),
    );
    let env = env_for(
        &game,
        2,
        Some(BetBonusConfig {
            bonus_num: 0,
            random_range: Vec::new(),
            bonus_sequence: vec![1, 2, 3],
        }),
    );

    let mut session = Session::new("carol");
    session.run(&client, &env).await;

    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(env.stats.process(), 2);
    // 3 bets + 2 bonus selections
    assert_eq!(env.stats.step(), 5);
    assert_eq!(backend.bets.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(backend.bonuses.load(std::sync::atomic::Ordering::SeqCst), 2);
}

/// Token expiry mid-run: one "invalid token" reply forces a full
/// relaunch+relogin and the session still completes without failing.
#[tokio::test]
async fn relaunch_recovers_from_expired_token() {
    let (addr, backend) = common::spawn_backend().await;
    backend.push_bet(json!({"code": 100, "msg": "invalid token", "data": null}));

    let (client, game, _cfg) = client_for(
        addr,
        Arc::new(FlagSlot::new(18904, "Pharaoh Returns")),
        task_config(18904, 1, 1),
    );
    let env = env_for(&game, 1, None);

    let mut session = Session::new("dave");
    session.run(&client, &env).await;

    assert_eq!(session.state(), SessionState::Completed);
    assert!(backend.launches.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    assert!(env.stats.errors() >= 1);
    assert_eq!(env.stats.process(), 1);
}

/// Cancellation mid-run: the session ends FAILED with the cancel reason and
/// stops issuing requests promptly.
#[tokio::test]
async fn cancel_mid_run_fails_session() {
    let (addr, backend) = common::spawn_backend().await;
    let (client, game, _cfg) = client_for(
        addr,
        Arc::new(FlagSlot::new(18904, "Pharaoh Returns")),
        task_config(18904, 1, 1_000_000),
    );
    let env = env_for(&game, 1_000_000, None);

    let cancel = env.cancel.clone();
    let worker = tokio::spawn({
        let env = env.clone();
        async move {
            let mut session = Session::new("erin");
            session.run(&client, &env).await;
            session
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let session = worker.await.expect("worker joins");

    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.last_error(), "task cancelled");

    let bets_at_cancel = backend.bets.load(std::sync::atomic::Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        backend.bets.load(std::sync::atomic::Ordering::SeqCst),
        bets_at_cancel
    );
}

// ---- binary-decoder path ---------------------------------------------------

struct PacketSlot;

fn decode_json_packet(raw: &[u8]) -> Result<Value, GameError> {
    serde_json::from_slice(raw).map_err(|e| GameError::Decode(e.to_string()))
}

impl GameBehavior for PacketSlot {
    fn game_id(&self) -> i64 {
        18970
    }

    fn name(&self) -> &str {
        "Packet Slot"
    }

    fn is_spin_over(&self, data: &Value) -> bool {
        data.get("isSpinOver").and_then(Value::as_bool) == Some(true)
    }

    fn decoder(&self) -> Option<ResponseDecoder> {
        Some(decode_json_packet)
    }
}

#[tokio::test]
async fn binary_game_decodes_bytes_payload() {
    let (addr, backend) = common::spawn_backend().await;
    let payload = BASE64.encode(br#"{"isSpinOver": true, "roundWin": 4}"#);
    backend.push_bet(json!({"code": 0, "msg": "", "data": null, "bytes": payload}));

    let (client, _game, _cfg) = client_for(addr, Arc::new(PacketSlot), task_config(18970, 1, 1));

    let token = client.launch("frank").await.expect("launch");
    let login = client.login(&token).await.expect("login");
    let data = client.bet_order(&login.token).await.expect("bet decodes");
    assert_eq!(data["roundWin"], json!(4));
}

#[tokio::test]
async fn binary_game_rejects_empty_bytes() {
    let (addr, backend) = common::spawn_backend().await;
    backend.push_bet(json!({"code": 0, "msg": "", "data": null, "bytes": ""}));

    let (client, _game, _cfg) = client_for(addr, Arc::new(PacketSlot), task_config(18970, 1, 1));

    let token = client.launch("gina").await.expect("launch");
    let login = client.login(&token).await.expect("login");
    match client.bet_order(&login.token).await {
        Err(ApiError::EmptyBinary(game_id)) => assert_eq!(game_id, 18970),
        other => panic!("expected EmptyBinary, got {other:?}"),
    }
}

/// The launch redirect is URL-encoded and the token's `+` survives the
/// space fixup end-to-end.
#[tokio::test]
async fn launch_token_roundtrip() {
    let (addr, _backend) = common::spawn_backend().await;
    let (client, _game, _cfg) = client_for(
        addr,
        Arc::new(FlagSlot::new(18904, "Pharaoh Returns")),
        task_config(18904, 1, 1),
    );

    let token = client.launch("henry").await.expect("launch");
    assert_eq!(token, "tok+1");

    let login = client.login(&token).await.expect("login accepts the token");
    assert_eq!(login.token, "sess-tok+1");
}
