//! Stress-testing control plane for slot-style game back-ends.
//!
//! Drives fleets of synthetic players against a remote gaming API, enforces
//! per-game completion semantics, and emits progress/RTP telemetry for
//! dashboards and post-run reports.
//!
//! ## Architecture
//!
//! - **Single-writer scheduler**: tasks queue FIFO; a coalesced wake channel
//!   replaces polling, and admission only happens once a full player
//!   allotment is secured
//! - **Per-task isolation**: each task owns its HTTP connection pool, its
//!   session fan-out, and its cancellation scope
//! - **Lock-free counters**: all task statistics are atomics; snapshots are
//!   plain values computed without holding locks
//!
//! ## Modules
//!
//! - `game`: capability records for per-game behavior (spin-over, bonus,
//!   response decoding, valid stakes)
//! - `player`: bounded pool of pre-provisioned synthetic identities
//! - `client`: HTTP client for the game-backend wire protocol
//! - `session`: per-player state machine (launch → login → bet → bonus)
//! - `task`: task aggregate, atomic statistics, lifecycle
//! - `scheduler` / `executor`: admission loop and per-task orchestration
//! - `data`: MySQL/Redis queries the core issues
//! - `server`: thin axum control surface

pub mod chart;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod executor;
pub mod game;
pub mod metrics;
pub mod notify;
pub mod player;
pub mod report;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod storage;
pub mod task;
pub mod task_pool;

pub use chart::{ChartGenerator, ChartResult, Point};
pub use client::{ApiClient, ApiError, BonusReply, ClientTargets, GameApi, LoginReply};
pub use config::AppConfig;
pub use coordinator::{Coordinator, CoordinatorError};
pub use data::{Data, DataError, OrderAggregate, OrderScope, StressRepo};
pub use executor::{execute_task, ExecutorDeps};
pub use game::{Game, GameBehavior, GameRegistry, ResponseDecoder};
pub use notify::{Message, Notifier, NoopNotifier, WebhookNotifier};
pub use player::{PlayerInfo, PlayerPool};
pub use report::TaskReport;
pub use scheduler::{Scheduler, WakeHandle};
pub use session::{Session, SessionEnv, SessionState};
pub use storage::{ArtifactStore, S3Store};
pub use task::{Task, TaskConfig, TaskStats, TaskStatus};
pub use task_pool::TaskPool;
