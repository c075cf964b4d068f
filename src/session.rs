//! Per-player session state machine.
//!
//! One worker owns a session for its whole life: no field is shared, and the
//! only things a session publishes are counter updates through the task's
//! atomic statistics. The walk is `launch → login → bet ⇄ bonus-select`
//! until the per-member round target is reached or the retry budget burns
//! out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiError, GameApi};
use crate::game::Game;
use crate::task::{BetBonusConfig, TaskStats};

/// Delay between retries of non-structured errors.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry budget per state; progress resets it.
const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    LoggingIn,
    Betting,
    BonusSelect,
    Completed,
    Failed,
}

/// Immutable view a session drives against: the game's capability record,
/// the task's counters and cancellation scope, and the bonus plan. Sessions
/// never see the task itself.
#[derive(Clone)]
pub struct SessionEnv {
    pub game: Arc<Game>,
    pub stats: Arc<TaskStats>,
    pub cancel: CancellationToken,

    /// Rounds each member must complete (K).
    pub rounds_per_member: i64,

    pub bonus: BetBonusConfig,
    pub max_retries: u32,
}

impl SessionEnv {
    pub fn new(
        game: Arc<Game>,
        stats: Arc<TaskStats>,
        cancel: CancellationToken,
        rounds_per_member: i64,
        bonus: Option<BetBonusConfig>,
    ) -> Self {
        Self {
            game,
            stats,
            cancel,
            rounds_per_member,
            bonus: bonus.unwrap_or_default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Outcome of the per-error policy: keep iterating or stop the session.
enum Recovery {
    Retry,
    GiveUp,
}

pub struct Session {
    name: String,
    state: SessionState,
    token: String,

    /// Rounds completed by this player.
    rounds_done: i64,
    retries: u32,
    bonus_cursor: usize,
    last_error: String,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: SessionState::Idle,
            token: String::new(),
            rounds_done: 0,
            retries: 0,
            bonus_cursor: 0,
            last_error: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn rounds_done(&self) -> i64 {
        self.rounds_done
    }

    pub fn is_failed(&self) -> bool {
        self.state == SessionState::Failed
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Drive the session to a terminal state.
    pub async fn run(&mut self, api: &impl GameApi, env: &SessionEnv) {
        loop {
            if matches!(self.state, SessionState::Completed | SessionState::Failed) {
                return;
            }
            if env.cancel.is_cancelled() {
                self.fail_cancelled();
                return;
            }

            self.retries += 1;
            if let Err(err) = self.step(api, env).await {
                if matches!(self.handle_error(&err, env).await, Recovery::GiveUp) {
                    return;
                }
            }

            if env.cancel.is_cancelled() && !matches!(self.state, SessionState::Completed) {
                self.fail_cancelled();
                return;
            }
        }
    }

    async fn step(&mut self, api: &impl GameApi, env: &SessionEnv) -> Result<(), ApiError> {
        match self.state {
            SessionState::Idle | SessionState::Launching => {
                let token = api.launch(&self.name).await?;
                self.token = token;
                self.state = SessionState::LoggingIn;
                self.retries = 0;
            }
            SessionState::LoggingIn => {
                let reply = api.login(&self.token).await?;
                self.token = reply.token;
                self.state = if env.game.needs_bonus(&reply.free_data) {
                    SessionState::BonusSelect
                } else {
                    SessionState::Betting
                };
                self.retries = 0;
            }
            SessionState::Betting => {
                let start = Instant::now();
                let data = api.bet_order(&self.token).await?;
                let latency = start.elapsed();

                let spin_over = env.game.is_spin_over(&data);
                if spin_over {
                    self.rounds_done += 1;
                    if self.rounds_done >= env.rounds_per_member {
                        self.state = SessionState::Completed;
                    }
                }
                if env.game.needs_bonus(&data) {
                    self.state = SessionState::BonusSelect;
                }
                env.stats.record_bet(latency, spin_over);
                self.retries = 0;
            }
            SessionState::BonusSelect => {
                let bonus_num = self.pick_bonus_num(env);
                let start = Instant::now();
                let reply = api.bet_bonus(&self.token, bonus_num).await?;
                let latency = start.elapsed();

                if !reply.next {
                    self.state = SessionState::Betting;
                }
                env.stats.record_bonus(latency);
                self.retries = 0;
            }
            SessionState::Completed | SessionState::Failed => {}
        }
        Ok(())
    }

    /// Uniform retry policy. The task-wide error counter only moves on a
    /// change of message, so a flapping endpoint cannot flood the gauge.
    async fn handle_error(&mut self, err: &ApiError, env: &SessionEnv) -> Recovery {
        let msg = err.to_string();
        if self.last_error != msg {
            env.stats.record_error();
        }
        self.last_error = msg;

        if self.retries > env.max_retries {
            self.state = SessionState::Failed;
            return Recovery::GiveUp;
        }

        match err {
            ApiError::Launch { .. } => {
                // one cooperative back-off, then the session is done
                let _ = self.sleep_or_cancel(RETRY_DELAY, env).await;
                self.state = SessionState::Failed;
                Recovery::GiveUp
            }
            ApiError::BetOrder {
                relaunch,
                relogin,
                backoff,
                ..
            } => {
                if !self
                    .sleep_or_cancel(backoff.unwrap_or(RETRY_DELAY), env)
                    .await
                {
                    return Recovery::GiveUp;
                }
                if *relaunch {
                    self.token.clear();
                    self.state = SessionState::Launching;
                } else if *relogin {
                    self.state = SessionState::LoggingIn;
                }
                Recovery::Retry
            }
            _ => {
                if !self.sleep_or_cancel(RETRY_DELAY, env).await {
                    return Recovery::GiveUp;
                }
                Recovery::Retry
            }
        }
    }

    /// Cancellable sleep; on cancellation the session fails and `false` is
    /// returned.
    async fn sleep_or_cancel(&mut self, duration: Duration, env: &SessionEnv) -> bool {
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = env.cancel.cancelled() => {
                self.fail_cancelled();
                false
            }
        }
    }

    fn fail_cancelled(&mut self) {
        self.state = SessionState::Failed;
        self.last_error = "task cancelled".to_string();
    }

    /// Bonus-number resolution: fixed number, then uniform draw from the
    /// configured range, then round-robin over the sequence, then 1.
    fn pick_bonus_num(&mut self, env: &SessionEnv) -> i64 {
        let bonus = &env.bonus;
        if bonus.bonus_num > 0 {
            return bonus.bonus_num;
        }
        if let [lo, hi] = bonus.random_range[..] {
            if lo <= hi {
                return rand::rng().random_range(lo..=hi);
            }
        }
        if !bonus.bonus_sequence.is_empty() {
            let n = bonus.bonus_sequence[self.bonus_cursor % bonus.bonus_sequence.len()];
            self.bonus_cursor += 1;
            return n;
        }
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BonusReply, LoginReply};
    use crate::game::builtin::{ChainBonusSlot, FlagSlot};
    use crate::game::GameBehavior;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    /// Scripted back-end: queued replies per endpoint, with a benign
    /// default once a queue drains.
    #[derive(Default)]
    struct ScriptApi {
        launches: Mutex<VecDeque<Result<String, ApiError>>>,
        bets: Mutex<VecDeque<Result<Value, ApiError>>>,
        bonuses: Mutex<VecDeque<Result<BonusReply, ApiError>>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptApi {
        fn push_bet(&self, r: Result<Value, ApiError>) {
            self.bets.lock().push_back(r);
        }

        fn push_bonus(&self, r: Result<BonusReply, ApiError>) {
            self.bonuses.lock().push_back(r);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl GameApi for ScriptApi {
        async fn launch(&self, _member: &str) -> Result<String, ApiError> {
            self.calls.lock().push("launch");
            self.launches
                .lock()
                .pop_front()
                .unwrap_or(Ok("launch-token".to_string()))
        }

        async fn login(&self, _token: &str) -> Result<LoginReply, ApiError> {
            self.calls.lock().push("login");
            Ok(LoginReply {
                token: "session-token".to_string(),
                free_data: Value::Null,
            })
        }

        async fn bet_order(&self, _token: &str) -> Result<Value, ApiError> {
            self.calls.lock().push("bet");
            self.bets
                .lock()
                .pop_front()
                .unwrap_or(Ok(json!({"isSpinOver": true})))
        }

        async fn bet_bonus(&self, _token: &str, _bonus_num: i64) -> Result<BonusReply, ApiError> {
            self.calls.lock().push("bonus");
            self.bonuses.lock().pop_front().unwrap_or(Ok(BonusReply {
                data: Value::Null,
                next: false,
            }))
        }
    }

    fn env_with(game: Arc<dyn GameBehavior>, k: i64, bonus: Option<BetBonusConfig>) -> SessionEnv {
        SessionEnv::new(
            Arc::new(Game::new(game)),
            Arc::new(TaskStats::new(k)),
            CancellationToken::new(),
            k,
            bonus,
        )
    }

    #[tokio::test]
    async fn test_happy_path_counts_rounds() {
        let api = ScriptApi::default();
        let env = env_with(Arc::new(FlagSlot::new(1, "flag")), 3, None);
        let mut sess = Session::new("alice");

        sess.run(&api, &env).await;

        assert_eq!(sess.state(), SessionState::Completed);
        assert_eq!(sess.rounds_done(), 3);
        assert_eq!(env.stats.process(), 3);
        assert_eq!(env.stats.step(), 3);
        assert_eq!(api.calls()[..2], ["launch", "login"]);
    }

    #[tokio::test]
    async fn test_bonus_chain_trace() {
        let api = ScriptApi::default();
        // round 1 trips the bonus gate, bonus chains once, then two clean spins
        api.push_bet(Ok(json!({"isSpinOver": false, "nextState": 11})));
        api.push_bonus(Ok(BonusReply {
            data: json!({"state": 11, "nextState": 0}),
            next: true,
        }));
        api.push_bonus(Ok(BonusReply {
            data: json!({"state": 11, "nextState": 4}),
            next: false,
        }));

        let env = env_with(Arc::new(ChainBonusSlot::new(1, "chain")), 2, None);
        let mut sess = Session::new("bob");
        sess.run(&api, &env).await;

        assert_eq!(sess.state(), SessionState::Completed);
        assert_eq!(
            api.calls(),
            vec!["launch", "login", "bet", "bonus", "bonus", "bet", "bet"]
        );
        assert_eq!(env.stats.process(), 2);
        // 3 bets + 2 bonuses
        assert_eq!(env.stats.step(), 5);
    }

    #[tokio::test]
    async fn test_relaunch_on_invalid_token() {
        let api = ScriptApi::default();
        api.push_bet(Err(ApiError::BetOrder {
            code: 100,
            msg: "invalid token".to_string(),
            relaunch: true,
            relogin: false,
            backoff: None,
        }));

        let env = env_with(Arc::new(FlagSlot::new(1, "flag")), 1, None);
        let mut sess = Session::new("carol");
        sess.run(&api, &env).await;

        assert_eq!(sess.state(), SessionState::Completed);
        // re-entered the launch/login leg after the token expired
        assert_eq!(
            api.calls(),
            vec!["launch", "login", "bet", "launch", "login", "bet"]
        );
        assert_eq!(env.stats.errors(), 1);
    }

    #[tokio::test]
    async fn test_launch_error_is_terminal() {
        let api = ScriptApi::default();
        api.launches.lock().push_back(Err(ApiError::Launch {
            code: 5,
            msg: "merchant disabled".to_string(),
        }));

        let env = env_with(Arc::new(FlagSlot::new(1, "flag")), 1, None);
        let mut sess = Session::new("dave");
        sess.run(&api, &env).await;

        assert_eq!(sess.state(), SessionState::Failed);
        assert_eq!(api.calls(), vec!["launch"]);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausts() {
        let api = ScriptApi::default();
        for _ in 0..10 {
            api.push_bet(Err(ApiError::Status(502)));
        }

        let mut env = env_with(Arc::new(FlagSlot::new(1, "flag")), 1, None);
        env.max_retries = 2;
        let mut sess = Session::new("erin");
        sess.run(&api, &env).await;

        assert_eq!(sess.state(), SessionState::Failed);
        // identical consecutive errors are recorded once
        assert_eq!(env.stats.errors(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_fails_session() {
        let api = ScriptApi::default();
        let env = env_with(Arc::new(FlagSlot::new(1, "flag")), 100, None);
        env.cancel.cancel();

        let mut sess = Session::new("frank");
        sess.run(&api, &env).await;
        assert_eq!(sess.state(), SessionState::Failed);
        assert_eq!(sess.last_error(), "task cancelled");
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_pick_bonus_fixed_number_wins() {
        let env = env_with(
            Arc::new(FlagSlot::new(1, "flag")),
            1,
            Some(BetBonusConfig {
                bonus_num: 7,
                random_range: vec![1, 3],
                bonus_sequence: vec![9],
            }),
        );
        let mut sess = Session::new("x");
        assert_eq!(sess.pick_bonus_num(&env), 7);
    }

    #[test]
    fn test_pick_bonus_degenerate_range() {
        let env = env_with(
            Arc::new(FlagSlot::new(1, "flag")),
            1,
            Some(BetBonusConfig {
                bonus_num: 0,
                random_range: vec![4, 4],
                bonus_sequence: vec![],
            }),
        );
        let mut sess = Session::new("x");
        for _ in 0..16 {
            assert_eq!(sess.pick_bonus_num(&env), 4);
        }
    }

    #[test]
    fn test_pick_bonus_range_is_inclusive() {
        let env = env_with(
            Arc::new(FlagSlot::new(1, "flag")),
            1,
            Some(BetBonusConfig {
                bonus_num: 0,
                random_range: vec![2, 5],
                bonus_sequence: vec![],
            }),
        );
        let mut sess = Session::new("x");
        for _ in 0..64 {
            let n = sess.pick_bonus_num(&env);
            assert!((2..=5).contains(&n));
        }
    }

    #[test]
    fn test_pick_bonus_sequence_round_robin() {
        let env = env_with(
            Arc::new(FlagSlot::new(1, "flag")),
            1,
            Some(BetBonusConfig {
                bonus_num: 0,
                random_range: vec![],
                bonus_sequence: vec![3, 5, 8],
            }),
        );
        let mut sess = Session::new("x");
        let picks: Vec<i64> = (0..5).map(|_| sess.pick_bonus_num(&env)).collect();
        assert_eq!(picks, vec![3, 5, 8, 3, 5]);
    }

    #[test]
    fn test_pick_bonus_defaults_to_one() {
        let env = env_with(Arc::new(FlagSlot::new(1, "flag")), 1, None);
        let mut sess = Session::new("x");
        assert_eq!(sess.pick_bonus_num(&env), 1);

        // inverted range is ignored
        let env = env_with(
            Arc::new(FlagSlot::new(1, "flag")),
            1,
            Some(BetBonusConfig {
                bonus_num: 0,
                random_range: vec![9, 2],
                bonus_sequence: vec![],
            }),
        );
        assert_eq!(sess.pick_bonus_num(&env), 1);
    }
}
