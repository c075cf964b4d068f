//! HTTP client for the game-backend wire protocol.
//!
//! One client per task, its connection pool sized to the task's member
//! count. Responses share a `{code, msg, data, bytes}` envelope; `code == 0`
//! is success and `bytes`, when the game requires it, carries a base64
//! binary payload handed to the game's decoder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::game::Game;
use crate::task::TaskConfig;

/// Hard cap on per-host connections regardless of member count.
const MAX_CONNS_CAP: usize = 10_000;

/// Single-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How much of a non-2xx body is consumed before the connection is dropped.
const ERROR_BODY_LIMIT: usize = 1024;

/// Server messages that invalidate the launch token and require a relaunch.
const RELAUNCH_KEYWORDS: [&str; 5] = [
    "连接失效",
    "internal error",
    "invalid token",
    "token expired",
    "unauthorized",
];

#[derive(Debug, Error)]
pub enum ApiError {
    /// Launch rejected; terminal for the session's current attempt.
    #[error("launch error: code={code} msg={msg}")]
    Launch { code: i64, msg: String },

    #[error("login error: code={code} msg={msg}")]
    Login { code: i64, msg: String },

    /// Bet rejected, with a structured recovery hint.
    #[error("betorder error: code={code} msg={msg}")]
    BetOrder {
        code: i64,
        msg: String,
        relaunch: bool,
        relogin: bool,
        backoff: Option<Duration>,
    },

    #[error("betbonus error: code={code} msg={msg}")]
    Bonus { code: i64, msg: String },

    #[error("http status {0}")]
    Status(u16),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("launch response contained no token")]
    EmptyToken,

    #[error("betorder response bytes is empty for game {0}")]
    EmptyBinary(i64),

    #[error("response decode failed: {0}")]
    Decode(String),
}

/// Resolved endpoints and signing material for one task.
#[derive(Debug, Clone)]
pub struct ClientTargets {
    pub launch_url: String,
    pub login_url: String,
    pub bet_order_url: String,
    pub bet_bonus_url: String,
    pub merchant: String,
    pub sign_required: bool,
    pub secret: String,
}

impl ClientTargets {
    /// Join base URLs into concrete endpoints.
    pub fn new(
        launch_base: &str,
        api_base: &str,
        merchant: String,
        sign_required: bool,
        secret: String,
    ) -> Self {
        let launch_base = launch_base.trim_end_matches('/');
        let api_base = api_base.trim_end_matches('/');
        Self {
            launch_url: format!("{launch_base}/v1/game/launch"),
            login_url: format!("{api_base}/api/member/login"),
            bet_order_url: format!("{api_base}/api/game/betorder"),
            bet_bonus_url: format!("{api_base}/api/game/betbonus"),
            merchant,
            sign_required,
            secret,
        }
    }
}

/// Login result: the session token plus the free-round state used to decide
/// whether a bonus selection is already pending.
#[derive(Debug, Clone)]
pub struct LoginReply {
    pub token: String,
    pub free_data: Value,
}

/// Bonus result: decoded data plus whether another selection must follow.
#[derive(Debug, Clone)]
pub struct BonusReply {
    pub data: Value,
    pub next: bool,
}

/// The per-game API surface the session driver runs against. `ApiClient` is
/// the production implementation; tests substitute scripted back-ends.
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn launch(&self, member: &str) -> Result<String, ApiError>;
    async fn login(&self, token: &str) -> Result<LoginReply, ApiError>;
    async fn bet_order(&self, token: &str) -> Result<Value, ApiError>;
    async fn bet_bonus(&self, token: &str, bonus_num: i64) -> Result<BonusReply, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    bytes: String,
}

/// Per-task HTTP client. Clones share the task's connection pool, so each
/// session worker holds a cheap handle.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    targets: ClientTargets,
    config: Arc<TaskConfig>,
    game: Arc<Game>,
}

impl ApiClient {
    /// Build a client whose pool is sized to `capacity` (clamped to
    /// [1, 10 000]). TLS verification is disabled: stress targets run
    /// self-signed inside the operator network.
    pub fn new(
        capacity: usize,
        targets: ClientTargets,
        config: Arc<TaskConfig>,
        game: Arc<Game>,
    ) -> Result<Self, ApiError> {
        let capacity = capacity.clamp(1, MAX_CONNS_CAP);
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(capacity)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            http,
            targets,
            config,
            game,
        })
    }

    async fn post(&self, url: &str, body: &Value, token: Option<&str>) -> Result<Envelope, ApiError> {
        self.post_signed(url, body, token, None).await
    }

    async fn post_signed(
        &self,
        url: &str,
        body: &Value,
        token: Option<&str>,
        sign: Option<String>,
    ) -> Result<Envelope, ApiError> {
        let mut req = self.http.post(url).json(body);
        if let Some(token) = token {
            req = req.header("x-token", token);
        }
        if let Some(sign) = sign {
            req = req.header("Sign", sign);
        }

        let mut resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            // drain at most 1 KiB so a large error body cannot stall us
            let mut consumed = 0usize;
            while let Some(chunk) = resp.chunk().await.unwrap_or(None) {
                consumed += chunk.len();
                if consumed >= ERROR_BODY_LIMIT {
                    break;
                }
            }
            return Err(ApiError::Status(status.as_u16()));
        }

        Ok(resp.json::<Envelope>().await?)
    }

    fn decode_bet_data(&self, env: Envelope) -> Result<Value, ApiError> {
        if let Some(decoder) = self.game.decoder() {
            let trimmed = env.bytes.trim();
            if trimmed.is_empty() {
                return Err(ApiError::EmptyBinary(self.config.game_id));
            }
            let raw = BASE64
                .decode(trimmed)
                .map_err(|e| ApiError::Decode(format!("base64: {e}")))?;
            return decoder(&raw).map_err(|e| ApiError::Decode(e.to_string()));
        }
        Ok(env.data)
    }
}

#[async_trait]
impl GameApi for ApiClient {
    /// Launch a game for `member`, returning the launch token embedded in
    /// the redirect URL the server answers with.
    async fn launch(&self, member: &str) -> Result<String, ApiError> {
        let timestamp = Utc::now().timestamp();
        let body = json!({
            "gameId": self.config.game_id,
            "merchant": self.targets.merchant,
            "member": member,
            "timestamp": timestamp,
        });

        let sign = self.targets.sign_required.then(|| {
            sign_launch(
                timestamp,
                &self.targets.merchant,
                member,
                self.config.game_id,
                &self.targets.secret,
            )
        });

        let env = self
            .post_signed(&self.targets.launch_url, &body, None, sign)
            .await?;
        if env.code != 0 {
            return Err(ApiError::Launch {
                code: env.code,
                msg: env.msg,
            });
        }

        let launch_url = env
            .data
            .get("launchUrl")
            .and_then(Value::as_str)
            .unwrap_or_default();
        extract_launch_token(launch_url)
    }

    async fn login(&self, token: &str) -> Result<LoginReply, ApiError> {
        let env = self
            .post(&self.targets.login_url, &json!({ "token": token }), None)
            .await?;
        if env.code != 0 {
            return Err(ApiError::Login {
                code: env.code,
                msg: env.msg,
            });
        }

        let session_token = env
            .data
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .replace(' ', "+");
        let free_data = env.data.get("freeData").cloned().unwrap_or(Value::Null);
        Ok(LoginReply {
            token: session_token,
            free_data,
        })
    }

    async fn bet_order(&self, token: &str) -> Result<Value, ApiError> {
        let bet = &self.config.bet_order;
        let body = json!({
            "gameId": self.config.game_id,
            "baseMoney": bet.base_money,
            "multiple": bet.multiple,
            "purchase": bet.purchase,
        });

        let env = self
            .post(&self.targets.bet_order_url, &body, Some(token))
            .await?;
        if env.code != 0 {
            return Err(classify_bet_error(env.code, &env.msg));
        }
        self.decode_bet_data(env)
    }

    async fn bet_bonus(&self, token: &str, bonus_num: i64) -> Result<BonusReply, ApiError> {
        let body = json!({
            "gameId": self.config.game_id,
            "bonusNum": bonus_num,
        });

        let env = self
            .post(&self.targets.bet_bonus_url, &body, Some(token))
            .await?;
        if env.code != 0 {
            return Err(ApiError::Bonus {
                code: env.code,
                msg: env.msg,
            });
        }

        let next = self.game.bonus_next_state(&env.data);
        Ok(BonusReply {
            data: env.data,
            next,
        })
    }
}

/// `hex(MD5(timestamp || merchant || member || game_id || secret))`,
/// lower-case, seconds since epoch.
pub fn sign_launch(timestamp: i64, merchant: &str, member: &str, game_id: i64, secret: &str) -> String {
    let payload = format!("{timestamp}{merchant}{member}{game_id}{secret}");
    format!("{:x}", md5::compute(payload.as_bytes()))
}

/// Pull the `token` query parameter out of the (URL-encoded) redirect the
/// launch endpoint returns. The server encodes `+` as space, so spaces in
/// the extracted token are mapped back to `+`.
fn extract_launch_token(launch_url: &str) -> Result<String, ApiError> {
    if launch_url.is_empty() {
        return Err(ApiError::EmptyToken);
    }
    let decoded = percent_decode_str(launch_url)
        .decode_utf8()
        .map_err(|e| ApiError::Decode(format!("launch url: {e}")))?;
    let parsed =
        Url::parse(&decoded).map_err(|e| ApiError::Decode(format!("launch url: {e}")))?;

    let token = parsed
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::EmptyToken);
    }
    Ok(token.replace(' ', "+"))
}

/// Classify a non-zero bet-order reply into a recovery hint: relaunch on
/// token-invalidation messages (1 s back-off for "internal error"), relogin
/// with a 3 s back-off on rate limits, terminal otherwise.
fn classify_bet_error(code: i64, msg: &str) -> ApiError {
    let msg = msg.trim().to_string();
    let lower = msg.to_lowercase();

    for kw in RELAUNCH_KEYWORDS {
        if lower.contains(kw) {
            let backoff = (kw == "internal error").then(|| Duration::from_secs(1));
            return ApiError::BetOrder {
                code,
                msg,
                relaunch: true,
                relogin: false,
                backoff,
            };
        }
    }

    if lower.contains("limit") {
        return ApiError::BetOrder {
            code,
            msg,
            relaunch: false,
            relogin: true,
            backoff: Some(Duration::from_secs(3)),
        };
    }

    ApiError::BetOrder {
        code,
        msg,
        relaunch: false,
        relogin: false,
        backoff: None,
    }
}
