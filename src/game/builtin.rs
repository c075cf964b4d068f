//! Builtin game behaviors.
//!
//! These cover the capability surface the session driver exercises: a plain
//! flag-driven slot, a slot with chained bonus selection, and a free-spin
//! slot whose terminal signal is derived from win/freeNum counters. Real
//! deployments register additional records next to these.

use std::sync::Arc;

use serde_json::Value;

use super::{field_str, GameBehavior};

/// Slot that reports round completion through an `isSpinOver` flag.
pub struct FlagSlot {
    game_id: i64,
    name: &'static str,
}

impl FlagSlot {
    pub fn new(game_id: i64, name: &'static str) -> Self {
        Self { game_id, name }
    }
}

impl GameBehavior for FlagSlot {
    fn game_id(&self) -> i64 {
        self.game_id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn is_spin_over(&self, data: &Value) -> bool {
        field_str(data, "isSpinOver").as_deref() == Some("true")
    }
}

/// Slot with a mandatory, possibly chained bonus-selection round.
///
/// State 11 is the bonus phase; a response whose `nextState` is 11 enters
/// it, and while in it a zero `nextState` means another pick is required.
pub struct ChainBonusSlot {
    game_id: i64,
    name: &'static str,
}

impl ChainBonusSlot {
    pub fn new(game_id: i64, name: &'static str) -> Self {
        Self { game_id, name }
    }
}

impl GameBehavior for ChainBonusSlot {
    fn game_id(&self) -> i64 {
        self.game_id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn is_spin_over(&self, data: &Value) -> bool {
        field_str(data, "isSpinOver").as_deref() == Some("true")
    }

    fn needs_bonus(&self, data: &Value) -> bool {
        let next_state = field_str(data, "nextState");
        if next_state.as_deref() == Some("11") {
            return true;
        }
        field_str(data, "state").as_deref() == Some("11") && next_state.as_deref() == Some("0")
    }

    fn bonus_next_state(&self, data: &Value) -> bool {
        field_str(data, "state").as_deref() == Some("11")
            && field_str(data, "nextState").as_deref() == Some("0")
    }
}

/// Free-spin slot without an explicit terminal flag.
///
/// A round is over when the back-end says `isOver` (top level or nested
/// under `rtp`), or when both `win` and `freeNum` have drained to zero.
pub struct FreeSpinSlot {
    game_id: i64,
    name: &'static str,
}

impl FreeSpinSlot {
    pub fn new(game_id: i64, name: &'static str) -> Self {
        Self { game_id, name }
    }
}

impl GameBehavior for FreeSpinSlot {
    fn game_id(&self) -> i64 {
        self.game_id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn is_spin_over(&self, data: &Value) -> bool {
        if let Some(over) = data.get("isOver").and_then(Value::as_bool) {
            return over;
        }
        if let Some(rtp) = data.get("rtp") {
            if let Some(over) = rtp.get("isOver").and_then(Value::as_bool) {
                return over;
            }
        }
        field_str(data, "win").as_deref() == Some("0")
            && field_str(data, "freeNum").as_deref() == Some("0")
    }

    fn needs_bonus(&self, data: &Value) -> bool {
        if field_str(data, "bonusState").as_deref() == Some("1") {
            return true;
        }
        data.get("rtp")
            .map(|rtp| field_str(rtp, "bonusState").as_deref() == Some("1"))
            .unwrap_or(false)
    }
}

/// The default registry contents.
pub fn all() -> Vec<Arc<dyn GameBehavior>> {
    vec![
        Arc::new(ChainBonusSlot::new(18902, "Poseidon Power")),
        Arc::new(FlagSlot::new(18904, "Pharaoh Returns")),
        Arc::new(FreeSpinSlot::new(18912, "Money Tiger")),
        Arc::new(FlagSlot::new(18922, "Money Rabbit")),
        Arc::new(FreeSpinSlot::new(18943, "Mahjong Ways")),
    ]
}
