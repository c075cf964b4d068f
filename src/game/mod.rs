//! Per-game behavior: capability records and the startup registry.
//!
//! Game responses are loosely typed (`serde_json::Value`) because every game
//! exposes different fields; each game contributes a capability record of
//! predicates that walk the decoded tree. The core never declares per-game
//! response schemas — adding a game is registering one `(game_id, behavior)`
//! record and nothing else changes.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("game {0} not registered")]
    NotFound(i64),

    #[error("binary payload decode failed: {0}")]
    Decode(String),
}

/// Game-specific byte → value-tree decoder for back-ends that answer with a
/// base64 `bytes` field instead of JSON `data`.
pub type ResponseDecoder = fn(&[u8]) -> Result<Value, GameError>;

/// Capability vector a game must satisfy.
///
/// Implementations only inspect the decoded response tree; they hold no
/// mutable state and are shared across every session of a task.
pub trait GameBehavior: Send + Sync {
    fn game_id(&self) -> i64;

    fn name(&self) -> &str;

    /// Whether the bet response terminates the current round.
    fn is_spin_over(&self, data: &Value) -> bool;

    /// Whether a bonus-selection round is mandatory after this response.
    fn needs_bonus(&self, _data: &Value) -> bool {
        false
    }

    /// For games where bonus selection chains: whether another selection
    /// must follow the current one.
    fn bonus_next_state(&self, _data: &Value) -> bool {
        false
    }

    /// `Some` switches the bet-order response path to binary decoding.
    fn decoder(&self) -> Option<ResponseDecoder> {
        None
    }
}

/// A registered game: behavior plus its stake set.
///
/// Stake sets are populated once at registry build from the settings store;
/// a game without a settings row keeps an empty set and rejects every stake.
pub struct Game {
    behavior: Arc<dyn GameBehavior>,
    stakes: RwLock<Vec<f64>>,
}

impl Game {
    pub fn new(behavior: Arc<dyn GameBehavior>) -> Self {
        Self {
            behavior,
            stakes: RwLock::new(Vec::new()),
        }
    }

    pub fn game_id(&self) -> i64 {
        self.behavior.game_id()
    }

    pub fn name(&self) -> &str {
        self.behavior.name()
    }

    pub fn stakes(&self) -> Vec<f64> {
        self.stakes.read().clone()
    }

    pub(crate) fn set_stakes(&self, stakes: Vec<f64>) {
        *self.stakes.write() = stakes;
    }

    /// Membership in the frozen stake set.
    pub fn valid_stake(&self, money: f64) -> bool {
        self.stakes.read().iter().any(|&s| s == money)
    }

    pub fn is_spin_over(&self, data: &Value) -> bool {
        self.behavior.is_spin_over(data)
    }

    pub fn needs_bonus(&self, data: &Value) -> bool {
        self.behavior.needs_bonus(data)
    }

    pub fn bonus_next_state(&self, data: &Value) -> bool {
        self.behavior.bonus_next_state(data)
    }

    pub fn decoder(&self) -> Option<ResponseDecoder> {
        self.behavior.decoder()
    }
}

impl fmt::Debug for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Game")
            .field("game_id", &self.game_id())
            .field("name", &self.name())
            .field("stakes", &self.stakes())
            .finish()
    }
}

/// Startup-initialized, read-only registry of games.
pub struct GameRegistry {
    registry: HashMap<i64, Arc<Game>>,
    list: Vec<Arc<Game>>,
}

impl GameRegistry {
    /// Build the registry from behavior records and the batched stake-set
    /// lookup result keyed by game id.
    pub fn new(
        behaviors: Vec<Arc<dyn GameBehavior>>,
        mut stake_sets: HashMap<i64, Vec<f64>>,
    ) -> Self {
        let mut registry = HashMap::with_capacity(behaviors.len());
        let mut list = Vec::with_capacity(behaviors.len());

        for behavior in behaviors {
            let game = Arc::new(Game::new(behavior));
            if let Some(stakes) = stake_sets.remove(&game.game_id()) {
                game.set_stakes(stakes);
            }
            registry.insert(game.game_id(), Arc::clone(&game));
            list.push(game);
        }

        list.sort_by_key(|g| g.game_id());
        Self { registry, list }
    }

    /// O(1) lookup by game id.
    pub fn get(&self, game_id: i64) -> Option<Arc<Game>> {
        self.registry.get(&game_id).cloned()
    }

    /// Id-sorted copy of every registered game.
    pub fn list(&self) -> Vec<Arc<Game>> {
        self.list.clone()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// Stringified lookup of a response field, tolerant of numbers, bools and
/// strings the way game back-ends mix them.
pub(crate) fn field_str(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
