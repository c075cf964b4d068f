//! Single-writer admission loop.
//!
//! Exactly one loop owns the pending queue's consumer side. Everything else
//! (task creation, executor completion, player-loader batches) requests
//! admission through a 1-slot coalescing wake channel: pushing into a full
//! channel is a no-op because a pending wake is already enough.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{execute_task, ExecutorDeps};
use crate::player::PlayerPool;
use crate::task::TaskStatus;
use crate::task_pool::TaskPool;

/// Coalescing wake signal for the scheduler.
#[derive(Clone)]
pub struct WakeHandle {
    tx: mpsc::Sender<()>,
}

impl WakeHandle {
    /// Request an admission pass. A full channel already holds one.
    pub fn wake(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Build the coalescing wake channel.
pub fn wake_channel() -> (WakeHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (WakeHandle { tx }, rx)
}

pub struct Scheduler {
    tasks: Arc<TaskPool>,
    players: Arc<PlayerPool>,
    deps: Arc<ExecutorDeps>,
    max_running: usize,
    shutdown: CancellationToken,
    wake_rx: mpsc::Receiver<()>,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<TaskPool>,
        players: Arc<PlayerPool>,
        deps: Arc<ExecutorDeps>,
        max_running: usize,
        shutdown: CancellationToken,
        wake_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            tasks,
            players,
            deps,
            max_running: max_running.max(1),
            shutdown,
            wake_rx,
        }
    }

    /// Park on the wake channel and admit as many head-of-queue tasks as
    /// resources allow on each wake.
    pub async fn run(mut self) {
        info!(max_running = self.max_running, "scheduler started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                msg = self.wake_rx.recv() => {
                    if msg.is_none() {
                        return;
                    }
                    self.admit();
                }
            }
        }
    }

    /// One admission pass. `break`s re-park on the wake channel; the next
    /// wake comes from whoever changes the resource picture.
    fn admit(&self) {
        loop {
            if self.tasks.running_count() >= self.max_running {
                break;
            }

            let Some((task_id, task)) = self.tasks.peek_pending() else {
                break;
            };

            if task.status() != TaskStatus::Pending {
                self.tasks.drop_pending_head();
                continue;
            }

            let member_count = task.config().member_count as usize;
            if !self.players.can_allocate(member_count) {
                break;
            }
            if !self.tasks.dequeue_pending(&task_id) {
                // lost the race against another mutation of the queue head
                continue;
            }

            let Some(allocated) = self.players.allocate(&task_id, member_count) else {
                self.tasks.requeue_at_head(&task_id);
                break;
            };

            if task.start().is_err() {
                warn!(task = %task_id, "task no longer pending, returning players");
                self.players.release(&task_id);
                continue;
            }

            tokio::spawn(execute_task(task, allocated, Arc::clone(&self.deps)));
        }
    }
}
