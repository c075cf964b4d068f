//! Task registry plus the FIFO pending queue the scheduler consumes.
//!
//! Peek/dequeue are split so the single-writer scheduler can validate the
//! head before committing; `dequeue_pending` only pops when the head still
//! matches the peeked id.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::task::{Task, TaskStatus};

#[derive(Default)]
struct PoolInner {
    tasks: HashMap<String, Arc<Task>>,
    pending: VecDeque<String>,
}

/// Registry of all known tasks and the FIFO admission queue.
#[derive(Default)]
pub struct TaskPool {
    inner: RwLock<PoolInner>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and append it to the pending queue.
    pub fn add(&self, task: Arc<Task>) {
        let mut inner = self.inner.write();
        inner.pending.push_back(task.id().to_string());
        inner.tasks.insert(task.id().to_string(), task);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Task>> {
        self.inner.read().tasks.get(id).cloned()
    }

    /// All tasks, creation-time descending.
    pub fn list(&self) -> Vec<Arc<Task>> {
        let mut out: Vec<Arc<Task>> = self.inner.read().tasks.values().cloned().collect();
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        out
    }

    /// Remove a task from the registry and scrub it from the queue.
    pub fn remove(&self, id: &str) -> Option<Arc<Task>> {
        let mut inner = self.inner.write();
        let task = inner.tasks.remove(id);
        if task.is_some() {
            inner.pending.retain(|pid| pid != id);
        }
        task
    }

    /// Head of the pending queue without dequeuing. Ids whose task has
    /// disappeared are dropped on the way.
    pub fn peek_pending(&self) -> Option<(String, Arc<Task>)> {
        let mut inner = self.inner.write();
        while let Some(id) = inner.pending.front().cloned() {
            match inner.tasks.get(&id) {
                Some(task) => return Some((id, Arc::clone(task))),
                None => {
                    inner.pending.pop_front();
                }
            }
        }
        None
    }

    /// Pop the head iff it still matches `id` (optimistic concurrency for
    /// the single-writer scheduler).
    pub fn dequeue_pending(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.pending.front().map(String::as_str) != Some(id) {
            return false;
        }
        inner.pending.pop_front();
        true
    }

    /// Put an id back at the head. Only used by the allocator rollback.
    pub fn requeue_at_head(&self, id: &str) {
        self.inner.write().pending.push_front(id.to_string());
    }

    /// Discard an invalid head.
    pub fn drop_pending_head(&self) {
        self.inner.write().pending.pop_front();
    }

    /// Number of tasks currently RUNNING or PROCESSING.
    pub fn running_count(&self) -> usize {
        self.inner
            .read()
            .tasks
            .values()
            .filter(|t| {
                matches!(
                    t.status(),
                    TaskStatus::Running | TaskStatus::Processing
                )
            })
            .count()
    }

    /// Delete terminal tasks whose finish time is older than `retention`.
    /// Non-terminal tasks and tasks without a finish time are never
    /// collected. Returns the number deleted.
    pub fn cleanup_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .tasks
            .iter()
            .filter(|(_, t)| t.status().is_terminal())
            .filter(|(_, t)| t.finish_at().is_some_and(|f| f < cutoff))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            inner.tasks.remove(id);
            inner.pending.retain(|pid| pid != id);
        }
        expired.len()
    }

    /// Periodic sweep of expired terminal tasks until shutdown.
    pub async fn run_auto_cleanup(
        self: Arc<Self>,
        shutdown: CancellationToken,
        interval: Duration,
        retention: Duration,
    ) {
        info!(?interval, ?retention, "task cleaner started");
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // immediate first tick is not a sweep
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("task cleaner stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let deleted = self.cleanup_expired(retention);
                    if deleted > 0 {
                        info!(deleted, "expired tasks removed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::builtin::FlagSlot;
    use crate::game::{Game, GameBehavior};
    use crate::task::{BetOrderConfig, TaskConfig};

    fn make_task(id: &str) -> Arc<Task> {
        let behavior: Arc<dyn GameBehavior> = Arc::new(FlagSlot::new(1, "slot"));
        let config = TaskConfig {
            game_id: 1,
            description: String::new(),
            merchant: String::new(),
            member_count: 1,
            times_per_member: 1,
            bet_order: BetOrderConfig {
                base_money: 0.2,
                multiple: 1,
                purchase: 0,
            },
            bet_bonus: None,
            sign_required: false,
            launch_url: String::new(),
            api_url: String::new(),
        };
        Arc::new(Task::new(
            &CancellationToken::new(),
            id.to_string(),
            Arc::new(Game::new(behavior)),
            config,
        ))
    }

    #[test]
    fn test_fifo_peek_dequeue() {
        let pool = TaskPool::new();
        pool.add(make_task("a"));
        pool.add(make_task("b"));

        let (id, _) = pool.peek_pending().unwrap();
        assert_eq!(id, "a");
        // concurrent peeks agree on the head
        assert_eq!(pool.peek_pending().unwrap().0, "a");

        assert!(!pool.dequeue_pending("b"));
        assert!(pool.dequeue_pending("a"));
        assert_eq!(pool.peek_pending().unwrap().0, "b");
    }

    #[test]
    fn test_requeue_at_head() {
        let pool = TaskPool::new();
        pool.add(make_task("a"));
        pool.add(make_task("b"));
        assert!(pool.dequeue_pending("a"));
        pool.requeue_at_head("a");
        assert_eq!(pool.peek_pending().unwrap().0, "a");
    }

    #[test]
    fn test_peek_skips_removed_tasks() {
        let pool = TaskPool::new();
        pool.add(make_task("a"));
        pool.add(make_task("b"));
        pool.remove("a");
        assert_eq!(pool.peek_pending().unwrap().0, "b");
    }

    #[test]
    fn test_remove_scrubs_pending() {
        let pool = TaskPool::new();
        pool.add(make_task("a"));
        assert!(pool.remove("a").is_some());
        assert!(pool.remove("a").is_none());
        assert!(pool.peek_pending().is_none());
    }

    #[test]
    fn test_list_creation_descending() {
        let pool = TaskPool::new();
        pool.add(make_task("a"));
        std::thread::sleep(Duration::from_millis(5));
        pool.add(make_task("b"));
        let ids: Vec<String> = pool.list().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_cleanup_only_expired_terminal() {
        let pool = TaskPool::new();
        let done = make_task("done");
        done.cancel().unwrap();
        pool.add(Arc::clone(&done));
        pool.add(make_task("pending"));

        // nothing is old enough yet
        assert_eq!(pool.cleanup_expired(Duration::from_secs(3600)), 0);
        // with zero retention the finished task goes, the pending one stays
        assert_eq!(pool.cleanup_expired(Duration::ZERO), 1);
        assert!(pool.get("done").is_none());
        assert!(pool.get("pending").is_some());
    }

    #[test]
    fn test_running_count() {
        let pool = TaskPool::new();
        let t = make_task("r");
        t.start().unwrap();
        pool.add(t);
        pool.add(make_task("p"));
        assert_eq!(pool.running_count(), 1);
    }
}
