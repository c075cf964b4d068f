//! Backing stores: the queries the core issues against MySQL and Redis.
//!
//! [`StressRepo`] is the seam the executor, scheduler and loader depend on;
//! [`Data`] is the production implementation. Tests substitute in-memory
//! repos.

mod kv;
mod orders;
mod players;
mod settings;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use thiserror::Error;
use tracing::info;

use crate::chart::Point;
use crate::config::AppConfig;
use crate::player::PlayerInfo;

pub use orders::{accumulate_points, downsample, OrderRow};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("game {game_id}: invalid bet_size value {value:?}")]
    InvalidStake { game_id: i64, value: String },

    #[error("{0}")]
    Other(String),
}

/// A task's footprint in the order store. `exclude_amount` filters the
/// merchant-side "bonus credit" row type out of every query.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderScope {
    pub game_id: i64,
    pub merchant: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exclude_amount: f64,
}

/// Order-store aggregates; monetary sums are ×1e4 so arithmetic stays
/// integral end-to-end.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderAggregate {
    pub total_bet: i64,
    pub total_win: i64,
    pub bet_orders: i64,
    pub bonus_orders: i64,
}

impl OrderAggregate {
    /// `100·total_win/total_bet`, 0 when nothing was bet.
    pub fn rtp_pct(&self) -> f64 {
        if self.total_bet > 0 {
            self.total_win as f64 * 100.0 / self.total_bet as f64
        } else {
            0.0
        }
    }
}

/// Persistence operations the core issues. Implementations must be safe to
/// call from any worker.
#[async_trait]
pub trait StressRepo: Send + Sync {
    /// Idempotent player upsert: existing rows get their id back-filled,
    /// new rows are inserted and harvested for ids.
    async fn batch_upsert_players(&self, players: &mut Vec<PlayerInfo>) -> Result<(), DataError>;

    /// One batched read of every game's stake set.
    async fn load_stake_sets(&self, game_ids: &[i64])
        -> Result<HashMap<i64, Vec<f64>>, DataError>;

    /// Monotonic per-(date, game) id: `YYYYMMDD-<game_id>-<counter>`.
    async fn next_task_id(&self, game_id: i64) -> Result<String, DataError>;

    async fn order_count(&self, scope: &OrderScope) -> Result<i64, DataError>;

    async fn order_aggregate(&self, scope: &OrderScope) -> Result<OrderAggregate, DataError>;

    /// Delete the scope's rows, restricted to its time window.
    async fn delete_orders(&self, scope: &OrderScope) -> Result<u64, DataError>;

    /// Startup-time full wipe.
    async fn truncate_orders(&self) -> Result<(), DataError>;

    /// Cumulative-RTP chart points for the scope, ≤5000 after sampling.
    async fn sample_order_points(&self, scope: &OrderScope) -> Result<Vec<Point>, DataError>;

    /// Purge `{site}:*` keys for every site.
    async fn clean_sites(&self, sites: &[String]) -> Result<(), DataError>;
}

/// Production data layer: member DB, order DB and Redis.
#[derive(Clone)]
pub struct Data {
    members: MySqlPool,
    orders: MySqlPool,
    redis: MultiplexedConnection,
}

impl Data {
    pub async fn connect(cfg: &AppConfig) -> Result<Self, DataError> {
        let members = MySqlPoolOptions::new()
            .max_connections(cfg.database.max_connections)
            .connect(&cfg.database.members_url)
            .await?;
        let orders = MySqlPoolOptions::new()
            .max_connections(cfg.database.max_connections)
            .connect(&cfg.database.orders_url)
            .await?;

        let client = redis::Client::open(cfg.redis.url.as_str())?;
        let mut redis = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut redis).await?;

        info!("connected to member db, order db and redis");
        Ok(Self {
            members,
            orders,
            redis,
        })
    }
}

#[async_trait]
impl StressRepo for Data {
    async fn batch_upsert_players(&self, players: &mut Vec<PlayerInfo>) -> Result<(), DataError> {
        players::batch_upsert(&self.members, players).await
    }

    async fn load_stake_sets(
        &self,
        game_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<f64>>, DataError> {
        settings::load_stake_sets(&self.members, game_ids).await
    }

    async fn next_task_id(&self, game_id: i64) -> Result<String, DataError> {
        kv::next_task_id(self.redis.clone(), game_id).await
    }

    async fn order_count(&self, scope: &OrderScope) -> Result<i64, DataError> {
        orders::count(&self.orders, scope).await
    }

    async fn order_aggregate(&self, scope: &OrderScope) -> Result<OrderAggregate, DataError> {
        orders::aggregate(&self.orders, scope).await
    }

    async fn delete_orders(&self, scope: &OrderScope) -> Result<u64, DataError> {
        orders::delete_by_scope(&self.orders, scope).await
    }

    async fn truncate_orders(&self) -> Result<(), DataError> {
        orders::truncate(&self.orders).await
    }

    async fn sample_order_points(&self, scope: &OrderScope) -> Result<Vec<Point>, DataError> {
        orders::sample_points(&self.orders, scope).await
    }

    async fn clean_sites(&self, sites: &[String]) -> Result<(), DataError> {
        kv::clean_sites(self.redis.clone(), sites).await
    }
}

/// `?, ?, ...` for dynamic IN clauses.
pub(crate) fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_rtp_pct() {
        let agg = OrderAggregate {
            total_bet: 2_000_000,
            total_win: 1_940_000,
            bet_orders: 100,
            bonus_orders: 3,
        };
        assert!((agg.rtp_pct() - 97.0).abs() < 1e-9);
        assert_eq!(OrderAggregate::default().rtp_pct(), 0.0);
    }
}
