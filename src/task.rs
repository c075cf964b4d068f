//! Task aggregate: identity, config, lifecycle and atomic statistics.
//!
//! Status and timestamps sit behind a briefly-held mutex; everything the hot
//! path touches is an atomic counter. Sessions never see the task itself,
//! only its [`TaskStats`] and cancellation token.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::game::Game;
use crate::report::{avg_duration, pct_cap100, TaskReport};

/// Task lifecycle.
///
/// `Processing` brackets post-run artifact work: it is entered after the
/// session fan-out drains and the order-settlement wait returns, and exits
/// to `Completed` once the chart artifact is uploaded or artifact
/// generation is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("cannot start: status {0}")]
    NotPending(TaskStatus),

    #[error("task already finished or cancelled")]
    AlreadyFinished,
}

/// Immutable task configuration, accepted on create.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub game_id: i64,

    #[serde(default)]
    pub description: String,

    /// Merchant override; the launch config's merchant when empty.
    #[serde(default)]
    pub merchant: String,

    pub member_count: u32,
    pub times_per_member: u32,

    pub bet_order: BetOrderConfig,

    #[serde(default)]
    pub bet_bonus: Option<BetBonusConfig>,

    #[serde(default)]
    pub sign_required: bool,

    /// Per-task endpoint overrides; launch config when empty.
    #[serde(default)]
    pub launch_url: String,
    #[serde(default)]
    pub api_url: String,
}

impl TaskConfig {
    /// Total rounds this task must complete.
    pub fn target(&self) -> i64 {
        i64::from(self.member_count) * i64::from(self.times_per_member)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetOrderConfig {
    pub base_money: f64,

    #[serde(default = "default_multiple")]
    pub multiple: i64,

    #[serde(default)]
    pub purchase: i64,
}

fn default_multiple() -> i64 {
    1
}

/// Bonus-selection plan. Resolution order for the pick: fixed `bonus_num`,
/// then uniform draw from `random_range = [lo, hi]`, then round-robin over
/// `bonus_sequence`, then 1.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BetBonusConfig {
    #[serde(default)]
    pub bonus_num: i64,

    #[serde(default)]
    pub random_range: Vec<i64>,

    #[serde(default)]
    pub bonus_sequence: Vec<i64>,
}

/// Atomic task statistics. Counters are monotonically non-decreasing (bar
/// `active`, which tracks live sessions); readers may observe any consistent
/// prefix but never a regression.
#[derive(Debug, Default)]
pub struct TaskStats {
    target: AtomicI64,
    process: AtomicI64,
    bet_orders: AtomicI64,
    bet_bonuses: AtomicI64,
    duration_ns: AtomicI64,
    active: AtomicI64,
    completed_members: AtomicI64,
    failed_members: AtomicI64,
    errors: AtomicI64,
}

impl TaskStats {
    pub fn new(target: i64) -> Self {
        let s = Self::default();
        s.target.store(target, Ordering::Relaxed);
        s
    }

    /// A successful bet: one step, cumulative latency, and a completed
    /// round when the response was spin-over.
    pub fn record_bet(&self, latency: Duration, spin_over: bool) {
        self.bet_orders.fetch_add(1, Ordering::Relaxed);
        self.duration_ns
            .fetch_add(latency.as_nanos() as i64, Ordering::Relaxed);
        if spin_over {
            self.process.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A successful bonus selection: one step plus latency.
    pub fn record_bonus(&self, latency: Duration) {
        self.bet_bonuses.fetch_add(1, Ordering::Relaxed);
        self.duration_ns
            .fetch_add(latency.as_nanos() as i64, Ordering::Relaxed);
    }

    pub fn mark_session_start(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_session_done(&self, ok: bool) {
        self.active.fetch_add(-1, Ordering::Relaxed);
        if ok {
            self.completed_members.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_members.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One distinct error increment. Consecutive-duplicate debouncing is the
    /// session's job; this is just the counter.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn target(&self) -> i64 {
        self.target.load(Ordering::Relaxed)
    }

    pub fn process(&self) -> i64 {
        self.process.load(Ordering::Relaxed)
    }

    /// Total successful API requests.
    pub fn step(&self) -> i64 {
        self.bet_orders.load(Ordering::Relaxed) + self.bet_bonuses.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> i64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn completed_members(&self) -> i64 {
        self.completed_members.load(Ordering::Relaxed)
    }

    pub fn failed_members(&self) -> i64 {
        self.failed_members.load(Ordering::Relaxed)
    }

    fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.duration_ns.load(Ordering::Relaxed).max(0) as u64)
    }
}

#[derive(Debug, Default)]
struct Timestamps {
    start_at: Option<DateTime<Utc>>,
    finish_at: Option<DateTime<Utc>>,
}

/// A stress-test task.
pub struct Task {
    id: String,
    config: Arc<TaskConfig>,
    game: RwLock<Option<Arc<Game>>>,
    created_at: DateTime<Utc>,

    status: Mutex<TaskStatus>,
    times: Mutex<Timestamps>,
    record_url: RwLock<Option<String>>,

    cancel: CancellationToken,
    stats: Arc<TaskStats>,
}

impl Task {
    /// Create a pending task whose cancellation scope derives from `parent`.
    pub fn new(parent: &CancellationToken, id: String, game: Arc<Game>, config: TaskConfig) -> Self {
        let target = config.target();
        Self {
            id,
            config: Arc::new(config),
            game: RwLock::new(Some(game)),
            created_at: Utc::now(),
            status: Mutex::new(TaskStatus::Pending),
            times: Mutex::new(Timestamps::default()),
            record_url: RwLock::new(None),
            cancel: parent.child_token(),
            stats: Arc::new(TaskStats::new(target)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> Arc<TaskConfig> {
        Arc::clone(&self.config)
    }

    pub fn game(&self) -> Option<Arc<Game>> {
        self.game.read().clone()
    }

    /// Drop the game reference at resource-release time.
    pub fn clear_game(&self) {
        *self.game.write() = None;
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    /// Shared handle for sessions: counters only, no task reference.
    pub fn stats_handle(&self) -> Arc<TaskStats> {
        Arc::clone(&self.stats)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn start_at(&self) -> Option<DateTime<Utc>> {
        self.times.lock().start_at
    }

    pub fn finish_at(&self) -> Option<DateTime<Utc>> {
        self.times.lock().finish_at
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    /// General CAS primitive for status transitions. Entering a terminal
    /// state stamps `finish_at` if it is still unset.
    pub fn compare_and_set_status(&self, old: TaskStatus, new: TaskStatus) -> bool {
        let mut status = self.status.lock();
        if *status != old {
            return false;
        }
        *status = new;
        drop(status);
        if new.is_terminal() {
            self.stamp_finish();
        }
        true
    }

    /// PENDING → RUNNING, stamping `start_at`.
    pub fn start(&self) -> Result<(), TaskError> {
        if !self.compare_and_set_status(TaskStatus::Pending, TaskStatus::Running) {
            return Err(TaskError::NotPending(self.status()));
        }
        self.times.lock().start_at.get_or_insert_with(Utc::now);
        info!(task = %self.id, "task started");
        Ok(())
    }

    /// Transition to FAILED from any pre-terminal state and cancel the
    /// scope. Used for unrecoverable executor setup failures.
    pub fn fail(&self) {
        let mut status = self.status.lock();
        if status.is_terminal() {
            return;
        }
        *status = TaskStatus::Failed;
        drop(status);
        self.stamp_finish();
        self.cancel.cancel();
    }

    /// CANCELLED from any pre-terminal state; errors after terminal without
    /// side effects. Triggers the cancellation scope.
    pub fn cancel(&self) -> Result<(), TaskError> {
        {
            let mut status = self.status.lock();
            if status.is_terminal() {
                return Err(TaskError::AlreadyFinished);
            }
            *status = TaskStatus::Cancelled;
        }
        self.stamp_finish();
        self.cancel.cancel();
        info!(task = %self.id, "task cancelled");
        Ok(())
    }

    /// Signal the cancellation scope without a status change; lingering
    /// session requests return promptly.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stamp `finish_at` once; later calls are no-ops so elapsed time keeps
    /// reflecting the load phase rather than post-run bookkeeping.
    pub fn stamp_finish(&self) {
        self.times.lock().finish_at.get_or_insert_with(Utc::now);
    }

    pub fn record_url(&self) -> Option<String> {
        self.record_url.read().clone()
    }

    pub fn set_record_url(&self, url: String) {
        *self.record_url.write() = Some(url);
    }

    /// Pure snapshot of the counters at `now`. Order-store augmentation is
    /// the executor's job, never done here.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TaskReport {
        let status = self.status();
        let (start_at, finish_at) = {
            let t = self.times.lock();
            (t.start_at, t.finish_at)
        };

        let process = self.stats.process();
        let target = self.stats.target();
        let step = self.stats.step();

        let begin = start_at.unwrap_or(self.created_at);
        let end = finish_at.unwrap_or(now);
        let elapsed = (end - begin).to_std().unwrap_or_default();

        let sec = elapsed.as_secs_f64();
        let qps = if sec > 0.0 { process as f64 / sec } else { 0.0 };

        let game_name = self
            .game()
            .map(|g| g.name().to_string())
            .unwrap_or_default();

        TaskReport {
            task_id: self.id.clone(),
            game_id: self.config.game_id,
            game_name,
            status,
            process,
            target,
            step,
            elapsed,
            qps,
            avg_latency: avg_duration(self.stats.total_duration(), step),
            progress_pct: pct_cap100(process, target),
            active_members: self.stats.active(),
            completed_members: self.stats.completed_members(),
            failed_members: self.stats.failed_members(),
            failed_requests: self.stats.errors(),
            order_count: 0,
            bonus_order_count: 0,
            total_bet: 0,
            total_win: 0,
            rtp_pct: 0.0,
            record_url: self.record_url(),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("game_id", &self.config.game_id)
            .field("status", &self.status())
            .finish()
    }
}
