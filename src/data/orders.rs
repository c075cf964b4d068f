//! Queries against the `game_order` table.
//!
//! Every scoped query carries the same predicate: game, merchant, and
//! `amount != exclude_amount` to drop the merchant-side bonus-credit rows.
//! The chart sampler streams by `(created_at, id)` keyset so multi-million
//! row runs never materialize in memory.

use chrono::{Local, TimeZone, Utc};
use sqlx::{MySqlPool, Row};

use super::{DataError, OrderAggregate, OrderScope};
use crate::chart::Point;

/// X axis is in units of 10 000 orders; monetary sums are scaled by the
/// same factor to stay integral.
const ORDER_UNIT: f64 = 1e4;

/// Chart sample budget.
const MAX_SAMPLE_POINTS: usize = 5000;

/// Keyset pagination batch.
const SCAN_BATCH: i64 = 500_000;

const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) async fn count(pool: &MySqlPool, scope: &OrderScope) -> Result<i64, DataError> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM game_order WHERE game_id = ? AND merchant = ? AND amount != ?",
    )
    .bind(scope.game_id)
    .bind(&scope.merchant)
    .bind(scope.exclude_amount)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

pub(crate) async fn aggregate(
    pool: &MySqlPool,
    scope: &OrderScope,
) -> Result<OrderAggregate, DataError> {
    // amount/bonus_amount are decimal(16,4); ×10000 keeps them integral
    let row = sqlx::query(
        "SELECT \
           CAST(COALESCE(ROUND(SUM(amount) * 10000), 0) AS SIGNED) AS total_bet, \
           CAST(COALESCE(ROUND(SUM(bonus_amount) * 10000), 0) AS SIGNED) AS total_win, \
           COUNT(*) AS bet_orders, \
           CAST(COALESCE(SUM(CASE WHEN bonus_amount > 0 THEN 1 ELSE 0 END), 0) AS SIGNED) \
             AS bonus_orders \
         FROM game_order WHERE game_id = ? AND merchant = ? AND amount != ?",
    )
    .bind(scope.game_id)
    .bind(&scope.merchant)
    .bind(scope.exclude_amount)
    .fetch_one(pool)
    .await?;

    Ok(OrderAggregate {
        total_bet: row.try_get("total_bet")?,
        total_win: row.try_get("total_win")?,
        bet_orders: row.try_get("bet_orders")?,
        bonus_orders: row.try_get("bonus_orders")?,
    })
}

pub(crate) async fn delete_by_scope(
    pool: &MySqlPool,
    scope: &OrderScope,
) -> Result<u64, DataError> {
    let result = sqlx::query(
        "DELETE FROM game_order WHERE game_id = ? AND merchant = ? AND amount != ? \
         AND created_at BETWEEN ? AND ?",
    )
    .bind(scope.game_id)
    .bind(&scope.merchant)
    .bind(scope.exclude_amount)
    .bind(scope.start_time.timestamp())
    .bind(scope.end_time.timestamp())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn truncate(pool: &MySqlPool) -> Result<(), DataError> {
    sqlx::query("TRUNCATE TABLE game_order").execute(pool).await?;
    Ok(())
}

/// One order row, as the sampler sees it.
#[derive(Debug, Clone, Copy)]
pub struct OrderRow {
    pub amount: f64,
    pub bonus_amount: f64,
    pub created_at: i64,
}

pub(crate) async fn sample_points(
    pool: &MySqlPool,
    scope: &OrderScope,
) -> Result<Vec<Point>, DataError> {
    if scope.game_id == 0 || scope.merchant.is_empty() {
        return Err(DataError::Other(
            "game_id and merchant are required for chart sampling".to_string(),
        ));
    }

    let mut acc = RoundAccumulator::new();
    let (mut last_time, mut last_id) = (0i64, 0i64);

    loop {
        let rows = sqlx::query(
            "SELECT CAST(amount AS DOUBLE) AS amount, \
                    CAST(bonus_amount AS DOUBLE) AS bonus_amount, \
                    created_at, id FROM game_order \
             WHERE game_id = ? AND merchant = ? AND amount != ? \
               AND (created_at > ? OR (created_at = ? AND id > ?)) \
             ORDER BY created_at, id LIMIT ?",
        )
        .bind(scope.game_id)
        .bind(&scope.merchant)
        .bind(scope.exclude_amount)
        .bind(last_time)
        .bind(last_time)
        .bind(last_id)
        .bind(SCAN_BATCH)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            break;
        }

        for row in &rows {
            last_time = row.try_get("created_at")?;
            last_id = row.try_get("id")?;
            acc.push(OrderRow {
                amount: row.try_get("amount")?,
                bonus_amount: row.try_get("bonus_amount")?,
                created_at: last_time,
            });
        }
    }

    Ok(downsample(acc.finish(), MAX_SAMPLE_POINTS))
}

/// Round accumulation: a row with `amount > 0` begins a new round carrying
/// its bet and bonus; rows with `amount = 0` fold only their bonus into the
/// current round. Cumulative totals advance on round boundaries and on the
/// final flush; `y = (cum_bet - cum_win) / cum_bet`.
struct RoundAccumulator {
    points: Vec<Point>,
    cum_bet: f64,
    cum_win: f64,
    bet: f64,
    win: f64,
    pending: bool,
    rows: i64,
    round_time: i64,
}

impl RoundAccumulator {
    fn new() -> Self {
        Self {
            points: Vec::new(),
            cum_bet: 0.0,
            cum_win: 0.0,
            bet: 0.0,
            win: 0.0,
            pending: false,
            rows: 0,
            round_time: 0,
        }
    }

    fn push(&mut self, row: OrderRow) {
        self.rows += 1;
        if row.amount > 0.0 {
            if self.pending {
                self.flush(self.rows - 1);
            }
            self.bet = row.amount;
            self.win = row.bonus_amount;
            self.pending = true;
            self.round_time = row.created_at;
        } else {
            self.win += row.bonus_amount;
            if !self.pending && self.win > 0.0 {
                self.pending = true;
                self.round_time = row.created_at;
            }
        }
    }

    fn flush(&mut self, at_row: i64) {
        self.cum_bet += self.bet;
        self.cum_win += self.win;
        let y = if self.cum_bet > 0.0 {
            (self.cum_bet - self.cum_win) / self.cum_bet
        } else {
            0.0
        };
        self.points.push(Point {
            x: at_row as f64 / ORDER_UNIT,
            y,
            time: format_unix(self.round_time),
        });
        self.bet = 0.0;
        self.win = 0.0;
        self.pending = false;
    }

    fn finish(mut self) -> Vec<Point> {
        if self.pending {
            self.flush(self.rows);
        }
        self.points
    }
}

/// Pure entry point for the accumulation rule; the sampler feeds it rows in
/// `(created_at, id)` order.
pub fn accumulate_points(rows: impl IntoIterator<Item = OrderRow>) -> Vec<Point> {
    let mut acc = RoundAccumulator::new();
    for row in rows {
        acc.push(row);
    }
    acc.finish()
}

/// Even-stride truncation to at most `max` points, always keeping the first
/// and last.
pub fn downsample(points: Vec<Point>, max: usize) -> Vec<Point> {
    let n = points.len();
    if n <= max || max < 2 {
        return points;
    }
    let step = ((n - 1) / (max - 1)).max(1);
    let mut out = Vec::with_capacity(max);
    let mut i = 0;
    while i < n && out.len() < max - 1 {
        out.push(points[i].clone());
        i += step;
    }
    out.push(points[n - 1].clone());
    out
}

fn format_unix(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format(TIME_LAYOUT).to_string(),
        _ => Utc
            .timestamp_opt(ts, 0)
            .single()
            .map(|dt| dt.format(TIME_LAYOUT).to_string())
            .unwrap_or_default(),
    }
}
