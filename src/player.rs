//! Bounded pool of pre-provisioned synthetic player identities.
//!
//! Players move atomically between the idle list and per-task allocations;
//! at rest `idle + Σ allocated == total`. A background loader mints players
//! in batches, persists them idempotently, and wakes the scheduler after
//! every successful batch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PlayerLoaderConfig;
use crate::data::StressRepo;
use crate::scheduler::WakeHandle;

/// Numeric suffix offset so first-run names never collide with suffix 0.
const NAME_SUFFIX_OFFSET: u64 = 1000;

/// A synthetic player identity. `id` is assigned by the persistence layer
/// on upsert and back-filled into the pool's copy.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: i64,
    pub name: String,
    pub balance: f64,
}

#[derive(Default)]
struct PoolInner {
    idle: Vec<PlayerInfo>,
    allocated: HashMap<String, Vec<PlayerInfo>>,
    total: usize,
}

/// Player resource pool. All operations take the pool lock once; allocate
/// and release are atomic moves, never partial.
#[derive(Default)]
pub struct PlayerPool {
    inner: RwLock<PoolInner>,
}

impl PlayerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add freshly persisted players to the idle list.
    pub fn add_idle(&self, batch: Vec<PlayerInfo>) {
        let mut inner = self.inner.write();
        inner.total += batch.len();
        inner.idle.extend(batch);
    }

    /// Whether `count` players could be allocated right now.
    pub fn can_allocate(&self, count: usize) -> bool {
        self.inner.read().idle.len() >= count
    }

    /// Move exactly `count` players from idle to the task's allocation.
    /// All-or-nothing: on insufficiency returns `None` and changes nothing.
    pub fn allocate(&self, task_id: &str, count: usize) -> Option<Vec<PlayerInfo>> {
        let mut inner = self.inner.write();
        if inner.idle.len() < count {
            return None;
        }
        let allocated: Vec<PlayerInfo> = inner.idle.drain(..count).collect();
        inner
            .allocated
            .insert(task_id.to_string(), allocated.clone());
        Some(allocated)
    }

    /// Read-only copy of a task's current allocation.
    pub fn get_allocated(&self, task_id: &str) -> Vec<PlayerInfo> {
        self.inner
            .read()
            .allocated
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Return a task's players to the idle list. Idempotent.
    pub fn release(&self, task_id: &str) {
        let mut inner = self.inner.write();
        if let Some(players) = inner.allocated.remove(task_id) {
            inner.idle.extend(players);
        }
    }

    /// (idle, allocated_total, total).
    pub fn stats(&self) -> (usize, usize, usize) {
        let inner = self.inner.read();
        let allocated = inner.allocated.values().map(Vec::len).sum();
        (inner.idle.len(), allocated, inner.total)
    }
}

/// Long-running loader: every tick mint up to `batch_size` players until
/// `max_total` is reached, upsert them, add the persisted rows to the idle
/// list, and nudge the scheduler. On upsert failure the minted counter rolls
/// back by the failed batch and the batch retries on the next tick.
pub async fn run_player_loader(
    shutdown: CancellationToken,
    cfg: PlayerLoaderConfig,
    repo: Arc<dyn StressRepo>,
    pool: Arc<PlayerPool>,
    wake: WakeHandle,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(cfg.interval_secs.max(1)));
    let mut minted: u64 = 0;

    while minted < u64::from(cfg.max_total) {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let left = u64::from(cfg.max_total) - minted;
        let n = left.min(u64::from(cfg.batch_size));
        if n == 0 {
            continue;
        }

        let mut batch = Vec::with_capacity(n as usize);
        for _ in 0..n {
            minted += 1;
            batch.push(PlayerInfo {
                id: 0,
                name: format!("{}{}", cfg.name_prefix, minted + NAME_SUFFIX_OFFSET),
                balance: cfg.initial_balance,
            });
        }

        if let Err(err) = repo.batch_upsert_players(&mut batch).await {
            error!(error = %err, "player batch upsert failed, retrying next tick");
            minted -= n;
            continue;
        }

        pool.add_idle(batch);
        let (_, _, total) = pool.stats();
        info!(loaded = n, total, "player batch loaded");
        wake.wake();
    }

    info!(total = minted, "player loading completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn players(n: usize) -> Vec<PlayerInfo> {
        (0..n)
            .map(|i| PlayerInfo {
                id: i as i64 + 1,
                name: format!("p{i}"),
                balance: 100.0,
            })
            .collect()
    }

    #[test]
    fn test_allocate_all_or_nothing() {
        let pool = PlayerPool::new();
        pool.add_idle(players(3));

        assert!(pool.can_allocate(3));
        assert!(!pool.can_allocate(4));
        assert!(pool.allocate("t1", 4).is_none());
        // failed allocate changed nothing
        assert_eq!(pool.stats(), (3, 0, 3));

        let got = pool.allocate("t1", 2).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(pool.stats(), (1, 2, 3));
    }

    #[test]
    fn test_allocate_zero_members() {
        let pool = PlayerPool::new();
        let got = pool.allocate("t1", 0).unwrap();
        assert!(got.is_empty());
        assert_eq!(pool.stats(), (0, 0, 0));
    }

    #[test]
    fn test_release_restores_multiset() {
        let pool = PlayerPool::new();
        pool.add_idle(players(5));
        let before: HashSet<String> = pool
            .inner
            .read()
            .idle
            .iter()
            .map(|p| p.name.clone())
            .collect();

        pool.allocate("t1", 3).unwrap();
        pool.release("t1");

        let after: HashSet<String> = pool
            .inner
            .read()
            .idle
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(before, after);
        assert_eq!(pool.stats(), (5, 0, 5));

        // second release is a no-op
        pool.release("t1");
        assert_eq!(pool.stats(), (5, 0, 5));
    }

    #[test]
    fn test_invariant_holds_across_tasks() {
        let pool = PlayerPool::new();
        pool.add_idle(players(10));
        pool.allocate("a", 4).unwrap();
        pool.allocate("b", 3).unwrap();

        let (idle, allocated, total) = pool.stats();
        assert_eq!(idle + allocated, total);
        assert_eq!(pool.get_allocated("a").len(), 4);
        assert_eq!(pool.get_allocated("missing").len(), 0);

        pool.release("a");
        let (idle, allocated, total) = pool.stats();
        assert_eq!(idle + allocated, total);
        assert_eq!(idle, 7);
    }
}
