//! Orchestration root: task creation, lookup and teardown over the domain
//! pools.
//!
//! The control surface is thin glue over this type; everything stateful
//! lives in the pools and the scheduler.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::data::{DataError, StressRepo};
use crate::game::{Game, GameRegistry};
use crate::player::PlayerPool;
use crate::scheduler::WakeHandle;
use crate::task::{BetBonusConfig, BetOrderConfig, Task, TaskConfig, TaskError, TaskStatus};
use crate::task_pool::TaskPool;

/// Startup environment-cleanup deadline.
const STARTUP_CLEAN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);

/// Default bonus sequence handed to bench tasks.
const BENCH_BONUS_SEQUENCE: [i64; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("game not found: {0}")]
    GameNotFound(i64),

    #[error("game {game_id}: invalid bet money {money}, valid: {valid:?}")]
    InvalidStake {
        game_id: i64,
        money: f64,
        valid: Vec<f64>,
    },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Data(#[from] DataError),
}

pub struct Coordinator {
    cfg: Arc<AppConfig>,
    games: Arc<GameRegistry>,
    tasks: Arc<TaskPool>,
    players: Arc<PlayerPool>,
    repo: Arc<dyn StressRepo>,
    wake: WakeHandle,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        cfg: Arc<AppConfig>,
        games: Arc<GameRegistry>,
        tasks: Arc<TaskPool>,
        players: Arc<PlayerPool>,
        repo: Arc<dyn StressRepo>,
        wake: WakeHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            games,
            tasks,
            players,
            repo,
            wake,
            shutdown,
        }
    }

    pub fn games(&self) -> Vec<Arc<Game>> {
        self.games.list()
    }

    pub fn get_game(&self, game_id: i64) -> Option<Arc<Game>> {
        self.games.get(game_id)
    }

    pub fn list_tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.list()
    }

    pub fn get_task(&self, id: &str) -> Result<Arc<Task>, CoordinatorError> {
        self.tasks
            .get(id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(id.to_string()))
    }

    /// (idle, allocated, total) of the player pool.
    pub fn player_stats(&self) -> (usize, usize, usize) {
        self.players.stats()
    }

    /// Validate, persist an id, enqueue and wake the scheduler.
    pub async fn create_task(&self, config: TaskConfig) -> Result<Arc<Task>, CoordinatorError> {
        let game = self
            .games
            .get(config.game_id)
            .ok_or(CoordinatorError::GameNotFound(config.game_id))?;

        if !game.valid_stake(config.bet_order.base_money) {
            return Err(CoordinatorError::InvalidStake {
                game_id: config.game_id,
                money: config.bet_order.base_money,
                valid: game.stakes(),
            });
        }

        let id = self.repo.next_task_id(config.game_id).await?;
        let task = Arc::new(Task::new(&self.shutdown, id, game, config));
        self.tasks.add(Arc::clone(&task));
        info!(task = %task.id(), game = task.config().game_id, "task created");
        self.wake.wake();
        Ok(task)
    }

    /// CANCELLED if not terminal, then hand the players back.
    pub fn cancel_task(&self, id: &str) -> Result<(), CoordinatorError> {
        let task = self.get_task(id)?;
        task.cancel()?;
        self.players.release(id);
        self.wake.wake();
        Ok(())
    }

    /// Remove from the pool; a running task's executor releases its own
    /// players when it unwinds.
    pub fn delete_task(&self, id: &str) -> Result<(), CoordinatorError> {
        let Some(task) = self.tasks.remove(id) else {
            return Ok(());
        };
        task.stop();
        if task.status() != TaskStatus::Running {
            self.players.release(id);
        }
        self.wake.wake();
        Ok(())
    }

    pub fn record_url(&self, id: &str) -> Result<Option<String>, CoordinatorError> {
        Ok(self.get_task(id)?.record_url())
    }

    /// Create one task per selected game. Failures don't abort the batch;
    /// they are reported alongside the created ids.
    pub async fn bench(
        &self,
        game_ids: &[i64],
        member_count: u32,
        times_per_member: u32,
    ) -> (Vec<String>, Vec<String>) {
        let targets: Vec<Arc<Game>> = if game_ids.is_empty() {
            self.games.list()
        } else {
            game_ids.iter().filter_map(|&id| self.games.get(id)).collect()
        };

        let runs = targets.iter().map(|game| {
            let config = TaskConfig {
                game_id: game.game_id(),
                description: "bench".to_string(),
                merchant: String::new(),
                member_count,
                times_per_member,
                bet_order: BetOrderConfig {
                    base_money: pick_base_money(&game.stakes()),
                    multiple: 1,
                    purchase: 0,
                },
                bet_bonus: Some(BetBonusConfig {
                    bonus_num: 0,
                    random_range: Vec::new(),
                    bonus_sequence: BENCH_BONUS_SEQUENCE.to_vec(),
                }),
                sign_required: false,
                launch_url: String::new(),
                api_url: String::new(),
            };
            async move { (game.game_id(), self.create_task(config).await) }
        });

        let mut task_ids = Vec::new();
        let mut fails = Vec::new();
        for (game_id, result) in futures::future::join_all(runs).await {
            match result {
                Ok(task) => task_ids.push(task.id().to_string()),
                Err(err) => fails.push(format!("{game_id}:{err}")),
            }
        }
        (task_ids, fails)
    }

    /// Startup self-clean: purge site keys and wipe the order table so the
    /// previous run's residue cannot skew this one.
    pub async fn startup_clean(&self) {
        let work = async {
            if let Err(err) = self.repo.clean_sites(&self.cfg.launch.sites).await {
                warn!(error = %err, "startup redis clean failed");
            }
            match self.repo.truncate_orders().await {
                Ok(()) => info!("startup order-table truncate done"),
                Err(err) => warn!(error = %err, "startup order-table truncate failed"),
            }
        };
        if tokio::time::timeout(STARTUP_CLEAN_TIMEOUT, work).await.is_err() {
            warn!("startup cleanup timed out");
        }
    }
}

fn pick_base_money(sizes: &[f64]) -> f64 {
    if sizes.len() > 1 {
        sizes[1]
    } else if let Some(&first) = sizes.first() {
        first
    } else {
        0.1
    }
}
