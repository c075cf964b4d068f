//! Prometheus gauges for task progress and RTP.
//!
//! Gauges are idempotent last-writer-wins writes labeled by task and game,
//! suitable for scrape-based monitoring; the executor pushes a snapshot
//! every telemetry tick and once more after the final report.

use once_cell::sync::Lazy;
use prometheus::{register_gauge_vec, Encoder, GaugeVec, TextEncoder};

use crate::report::TaskReport;

const LABEL_TASK_ID: &str = "task_id";
const LABEL_GAME_ID: &str = "game_id";

fn gauge(name: &str, help: &str) -> GaugeVec {
    register_gauge_vec!(name, help, &[LABEL_TASK_ID, LABEL_GAME_ID])
        .expect("gauge registration cannot fail for a unique name")
}

static PROGRESS: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_progress", "Completed rounds"));
static PROGRESS_PCT: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_progress_pct", "Task progress (0-100)"));
static TOTAL_STEPS: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_total_steps", "Successful API requests"));
static QPS: Lazy<GaugeVec> = Lazy::new(|| gauge("stress_task_qps", "Completed rounds per second"));
static ACTIVE_MEMBERS: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_active_members", "Sessions currently running"));
static COMPLETED_MEMBERS: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_completed_members", "Sessions completed"));
static FAILED_MEMBERS: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_failed_members", "Sessions failed"));
static FAILED_REQUESTS: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_failed_requests", "Distinct request errors"));
static AVG_LATENCY_MS: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_avg_latency_ms", "Average request latency (ms)"));
static DURATION_SEC: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_duration_seconds", "Task elapsed seconds"));
static TOTAL_BET: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_total_bet", "Total bet (x1e4)"));
static TOTAL_WIN: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_total_win", "Total win (x1e4)"));
static RTP_PCT: Lazy<GaugeVec> = Lazy::new(|| gauge("stress_task_rtp_pct", "RTP percent"));
static ORDER_COUNT: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_order_count", "Orders persisted"));
static BONUS_ORDER_COUNT: Lazy<GaugeVec> =
    Lazy::new(|| gauge("stress_task_bonus_order_count", "Bonus orders persisted"));

/// Push one report into the gauge set.
pub fn report_task(r: &TaskReport) {
    let game_id = r.game_id.to_string();
    let labels = [r.task_id.as_str(), game_id.as_str()];

    PROGRESS.with_label_values(&labels).set(r.process as f64);
    PROGRESS_PCT.with_label_values(&labels).set(r.progress_pct);
    TOTAL_STEPS.with_label_values(&labels).set(r.step as f64);
    QPS.with_label_values(&labels).set(r.qps);
    ACTIVE_MEMBERS
        .with_label_values(&labels)
        .set(r.active_members as f64);
    COMPLETED_MEMBERS
        .with_label_values(&labels)
        .set(r.completed_members as f64);
    FAILED_MEMBERS
        .with_label_values(&labels)
        .set(r.failed_members as f64);
    FAILED_REQUESTS
        .with_label_values(&labels)
        .set(r.failed_requests as f64);
    AVG_LATENCY_MS
        .with_label_values(&labels)
        .set(r.avg_latency.as_secs_f64() * 1e3);
    DURATION_SEC
        .with_label_values(&labels)
        .set(r.elapsed.as_secs_f64());
    TOTAL_BET.with_label_values(&labels).set(r.total_bet as f64);
    TOTAL_WIN.with_label_values(&labels).set(r.total_win as f64);
    RTP_PCT.with_label_values(&labels).set(r.rtp_pct);
    ORDER_COUNT
        .with_label_values(&labels)
        .set(r.order_count as f64);
    BONUS_ORDER_COUNT
        .with_label_values(&labels)
        .set(r.bonus_order_count as f64);
}

/// Text exposition for the scrape endpoint.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
