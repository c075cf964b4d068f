//! Per-task orchestration.
//!
//! Owns the run from session fan-out to resource release: drive N sessions
//! to terminal states, wait for the order store to converge, emit the final
//! report, build the chart artifact, notify, clean the environment, and
//! hand the players back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chart::ChartGenerator;
use crate::client::{ApiClient, ClientTargets};
use crate::config::{ChartConfig, LaunchConfig};
use crate::data::{OrderScope, StressRepo};
use crate::metrics;
use crate::notify::{build_completion_message, Notifier};
use crate::player::{PlayerInfo, PlayerPool};
use crate::report::{short_duration, TaskReport};
use crate::scheduler::WakeHandle;
use crate::session::{Session, SessionEnv};
use crate::storage::ArtifactStore;
use crate::task::{Task, TaskStatus};

/// Telemetry push interval.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Progress log interval.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Order-settlement polling.
const SETTLEMENT_POLL: Duration = Duration::from_secs(5);
const SETTLEMENT_CAP: Duration = Duration::from_secs(300);

/// Environment-cleanup deadline.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything a task run needs besides the task itself.
pub struct ExecutorDeps {
    pub repo: Arc<dyn StressRepo>,
    pub players: Arc<PlayerPool>,
    pub notifier: Arc<dyn Notifier>,
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
    pub chart_gen: ChartGenerator,
    pub chart: ChartConfig,
    pub launch: LaunchConfig,
    pub notify_enabled: bool,
    pub wake: WakeHandle,
}

impl ExecutorDeps {
    fn merchant_for(&self, task: &Task) -> String {
        let cfg = task.config();
        if cfg.merchant.is_empty() {
            self.launch.merchant.clone()
        } else {
            cfg.merchant.clone()
        }
    }

    fn targets_for(&self, task: &Task) -> ClientTargets {
        let cfg = task.config();
        let launch_base = if cfg.launch_url.is_empty() {
            self.launch.launch_url.as_str()
        } else {
            cfg.launch_url.as_str()
        };
        let api_base = if cfg.api_url.is_empty() {
            self.launch.api_url.as_str()
        } else {
            cfg.api_url.as_str()
        };
        ClientTargets::new(
            launch_base,
            api_base,
            self.merchant_for(task),
            cfg.sign_required,
            self.launch.secret.clone(),
        )
    }

    /// The task's order-store footprint. Uses the configured exclusion
    /// sentinel when the task has no base money of its own.
    fn order_scope(&self, task: &Task) -> OrderScope {
        let cfg = task.config();
        let exclude_amount = if cfg.bet_order.base_money > 0.0 {
            cfg.bet_order.base_money
        } else {
            self.launch.exclude_amount
        };
        OrderScope {
            game_id: cfg.game_id,
            merchant: self.merchant_for(task),
            start_time: task.start_at().unwrap_or_else(|| task.created_at()),
            end_time: task.finish_at().unwrap_or_else(Utc::now),
            exclude_amount,
        }
    }
}

/// Run a task to completion. Spawned by the scheduler once players are
/// secured and the task has transitioned to RUNNING.
pub async fn execute_task(task: Arc<Task>, players: Vec<PlayerInfo>, deps: Arc<ExecutorDeps>) {
    let task_id = task.id().to_string();
    let capacity = players.len();

    let Some(game) = task.game() else {
        error!(task = %task_id, "game reference missing at execution");
        task.fail();
        release_resources(&task, &deps).await;
        return;
    };

    let client = match ApiClient::new(
        capacity.max(1),
        deps.targets_for(&task),
        task.config(),
        Arc::clone(&game),
    ) {
        Ok(client) => client,
        Err(err) => {
            error!(task = %task_id, error = %err, "api client setup failed");
            task.fail();
            release_resources(&task, &deps).await;
            return;
        }
    };

    let monitor = spawn_monitor(Arc::clone(&task));
    let (reporter_stop, reporter) = spawn_reporter(Arc::clone(&task), Arc::clone(&deps));

    // ---- session fan-out --------------------------------------------------
    let env = SessionEnv::new(
        Arc::clone(&game),
        task.stats_handle(),
        task.cancel_token(),
        i64::from(task.config().times_per_member),
        task.config().bet_bonus.clone(),
    );
    run_sessions(&client, &env, players).await;

    // ---- shutdown ordering ------------------------------------------------
    // 1. cancel the task scope: lingering requests return promptly
    task.stop();
    task.stamp_finish();

    // 2. wait for the order store to converge on what we sent
    wait_order_settlement(
        &task,
        deps.repo.as_ref(),
        &deps.order_scope(&task),
        SETTLEMENT_POLL,
        SETTLEMENT_CAP,
    )
    .await;

    reporter_stop.cancel();
    let _ = reporter.await;
    let _ = monitor.await;

    // 3. final report
    let mut report = augmented_report(&task, deps.repo.as_ref(), &deps.order_scope(&task)).await;
    metrics::report_task(&report);

    // 4. post-run bracket: PROCESSING covers artifact generation; the exit
    //    predicate is "artifact uploaded or generation disabled"
    if task.compare_and_set_status(TaskStatus::Running, TaskStatus::Processing) {
        upload_chart(&task, &deps, &mut report).await;
        task.compare_and_set_status(TaskStatus::Processing, TaskStatus::Completed);
    }

    // 5. notify on completion
    if deps.notify_enabled && task.status() == TaskStatus::Completed {
        report.status = TaskStatus::Completed;
        let msg = build_completion_message(&report);
        if let Err(err) = deps.notifier.send(&msg).await {
            warn!(task = %task_id, error = %err, "completion notification failed");
        }
    }

    // 6. environment cleanup
    cleanup_environment(&deps, &deps.order_scope(&task)).await;

    // 7. resource release
    drop(client);
    release_resources(&task, &deps).await;

    info!(
        task = %task_id,
        status = %task.status(),
        elapsed = %short_duration(task.snapshot(Utc::now()).elapsed),
        "task finished"
    );
}

/// Drive one session per player through a bounded worker pool. The
/// semaphore gives deterministic back-pressure on submission; the join set
/// gives deterministic teardown.
async fn run_sessions(client: &ApiClient, env: &SessionEnv, players: Vec<PlayerInfo>) {
    let limiter = Arc::new(Semaphore::new(players.len().max(1)));
    let mut workers: JoinSet<Session> = JoinSet::new();

    for player in players {
        let permit = match Arc::clone(&limiter).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let env = env.clone();
        let client = client.clone();
        env.stats.mark_session_start();

        workers.spawn(async move {
            let _permit = permit;
            let mut session = Session::new(player.name);
            session.run(&client, &env).await;
            env.stats.mark_session_done(!session.is_failed());
            session
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            // a panicked worker never reached mark_session_done
            error!(error = %err, "session worker aborted");
            env.stats.mark_session_done(false);
        }
    }
}

/// The backend persists orders asynchronously: poll the scope's count until
/// it reaches the locally observed step tally, give up at the cap and
/// proceed best-effort. Runs outside the task scope — cancellation must not
/// abort settlement bookkeeping.
pub async fn wait_order_settlement(
    task: &Task,
    repo: &dyn StressRepo,
    scope: &OrderScope,
    poll: Duration,
    cap: Duration,
) {
    let threshold = task.stats().step();
    if threshold <= 0 {
        return;
    }

    let wait = async {
        loop {
            match repo.order_count(scope).await {
                Ok(count) if count >= threshold => return,
                Ok(_) => {}
                Err(err) => warn!(task = %task.id(), error = %err, "order count failed"),
            }
            tokio::time::sleep(poll).await;
        }
    };

    if tokio::time::timeout(cap, wait).await.is_err() {
        warn!(task = %task.id(), threshold, "order settlement wait timed out, proceeding");
    }
}

/// Snapshot plus order-store aggregates; falls back to a bare count when
/// the aggregate query fails.
pub async fn augmented_report(task: &Task, repo: &dyn StressRepo, scope: &OrderScope) -> TaskReport {
    let mut report = task.snapshot(Utc::now());
    match repo.order_aggregate(scope).await {
        Ok(agg) => {
            report.total_bet = agg.total_bet;
            report.total_win = agg.total_win;
            report.order_count = agg.bet_orders;
            report.bonus_order_count = agg.bonus_orders;
            report.rtp_pct = agg.rtp_pct();
        }
        Err(err) => {
            warn!(task = %task.id(), error = %err, "order aggregate failed");
            if let Ok(count) = repo.order_count(scope).await {
                report.order_count = count;
            }
        }
    }
    report
}

fn spawn_monitor(task: Arc<Task>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let cancelled = task.cancel_token();
        let mut tick = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    let r = task.snapshot(Utc::now());
                    info!(
                        task = %r.task_id,
                        progress = format!("{}/{}", r.process, r.target),
                        steps = r.step,
                        elapsed = %short_duration(r.elapsed),
                        qps = format!("{:.2}", r.qps),
                        latency = %short_duration(r.avg_latency),
                        "run finished"
                    );
                    return;
                }
                _ = tick.tick() => {
                    let r = task.snapshot(Utc::now());
                    let sec = r.elapsed.as_secs_f64().max(f64::EPSILON);
                    info!(
                        task = %r.task_id,
                        progress = format!("{}/{} ({:.2}%)", r.process, r.target, r.progress_pct),
                        elapsed = %short_duration(r.elapsed),
                        eta = %short_duration(r.eta()),
                        qps = format!("{:.2}", r.qps),
                        step_rate = format!("{:.2}", r.step as f64 / sec),
                        latency = %short_duration(r.avg_latency),
                        "progress"
                    );
                }
            }
        }
    })
}

fn spawn_reporter(
    task: Arc<Task>,
    deps: Arc<ExecutorDeps>,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let stop = CancellationToken::new();
    let stopped = stop.clone();
    let handle = tokio::spawn(async move {
        let mut tick = tokio::time::interval(REPORT_INTERVAL);
        loop {
            tokio::select! {
                _ = stopped.cancelled() => return,
                _ = tick.tick() => {
                    let scope = deps.order_scope(&task);
                    let report = augmented_report(&task, deps.repo.as_ref(), &scope).await;
                    metrics::report_task(&report);
                }
            }
        }
    });
    (stop, handle)
}

/// Generate and upload the chart artifact, recording the presigned URL on
/// the task.
async fn upload_chart(task: &Task, deps: &ExecutorDeps, report: &mut TaskReport) {
    if !deps.chart.enabled {
        return;
    }

    let scope = deps.order_scope(task);
    let points = match deps.repo.sample_order_points(&scope).await {
        Ok(points) => points,
        Err(err) => {
            error!(task = %task.id(), error = %err, "chart point query failed");
            return;
        }
    };

    let result = match deps.chart_gen.generate(
        &points,
        task.id(),
        &report.game_name,
        &scope.merchant,
        deps.chart.save_local,
    ) {
        Ok(result) => result,
        Err(err) => {
            error!(task = %task.id(), error = %err, "chart generation failed");
            return;
        }
    };

    if !deps.chart.upload {
        return;
    }
    let Some(store) = &deps.artifacts else {
        warn!(task = %task.id(), "chart upload enabled but no artifact store");
        return;
    };

    let key = format!("charts/{}.html", task.id());
    match store
        .upload_bytes(&key, "text/html; charset=utf-8", result.html.into_bytes())
        .await
    {
        Ok(url) => {
            task.set_record_url(url.clone());
            report.record_url = Some(url);
        }
        Err(err) => error!(task = %task.id(), error = %err, "chart upload failed"),
    }
}

/// Redis-by-site cleanup and order-row deletion, concurrently, under one
/// deadline.
async fn cleanup_environment(deps: &ExecutorDeps, scope: &OrderScope) {
    let work = async {
        let (redis, orders) = tokio::join!(
            deps.repo.clean_sites(&deps.launch.sites),
            deps.repo.delete_orders(scope),
        );
        if let Err(err) = redis {
            error!(error = %err, "redis cleanup failed");
        }
        match orders {
            Ok(deleted) => info!(deleted, "test orders deleted"),
            Err(err) => error!(error = %err, "order deletion failed"),
        }
    };

    if tokio::time::timeout(CLEANUP_TIMEOUT, work).await.is_err() {
        warn!("environment cleanup timed out");
    }
}

async fn release_resources(task: &Task, deps: &ExecutorDeps) {
    deps.players.release(task.id());
    task.clear_game();
    deps.wake.wake();
}
