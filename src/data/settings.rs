//! Stake-set loading from the `game_setting` table.
//!
//! Read once at registry build; `bet_size` is a comma-separated float list
//! and malformed values fail fast rather than silently shrinking a game's
//! stake set.

use std::collections::HashMap;

use sqlx::{MySqlPool, Row};

use super::{placeholders, DataError};

pub(crate) async fn load_stake_sets(
    pool: &MySqlPool,
    game_ids: &[i64],
) -> Result<HashMap<i64, Vec<f64>>, DataError> {
    if game_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        "SELECT game_id, bet_size FROM game_setting WHERE game_id IN ({})",
        placeholders(game_ids.len())
    );
    let mut query = sqlx::query(&sql);
    for id in game_ids {
        query = query.bind(id);
    }

    let mut out = HashMap::new();
    for row in query.fetch_all(pool).await? {
        let game_id: i64 = row.try_get("game_id")?;
        let raw: String = row.try_get("bet_size")?;
        out.insert(game_id, parse_bet_sizes(game_id, &raw)?);
    }
    Ok(out)
}

pub(crate) fn parse_bet_sizes(game_id: i64, raw: &str) -> Result<Vec<f64>, DataError> {
    let mut sizes = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let value: f64 = part.parse().map_err(|_| DataError::InvalidStake {
            game_id,
            value: part.to_string(),
        })?;
        sizes.push(value);
    }
    Ok(sizes)
}
