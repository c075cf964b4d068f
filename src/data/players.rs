//! Player upsert against the `member` table.
//!
//! Select-by-name in chunks that stay under the placeholder limit, insert
//! the new rows in smaller chunks, then re-select to harvest the assigned
//! ids and back-fill the caller's batch.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{MySqlPool, Row};

use super::{placeholders, DataError};
use crate::player::PlayerInfo;

/// MySQL IN-clause chunk size.
const IN_CHUNK: usize = 250;

/// Insert batch size.
const INSERT_CHUNK: usize = 200;

const DEFAULT_MERCHANT: &str = "default";
const DEFAULT_MERCHANT_ID: i64 = 1;
const DEFAULT_PASSWORD: &str = "123456";

pub(crate) async fn batch_upsert(
    pool: &MySqlPool,
    players: &mut Vec<PlayerInfo>,
) -> Result<(), DataError> {
    if players.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    let names: Vec<String> = players.iter().map(|p| p.name.clone()).collect();
    let existing = select_ids_by_name(&mut tx, &names).await?;

    // back-fill ids on rows that already exist; collect the rest for insert
    let mut new_indices = Vec::new();
    for (i, p) in players.iter_mut().enumerate() {
        match existing.get(&p.name) {
            Some(&id) => p.id = id,
            None => new_indices.push(i),
        }
    }

    if !new_indices.is_empty() {
        let now = Utc::now().timestamp();
        for chunk in new_indices.chunks(INSERT_CHUNK) {
            let mut sql = String::from(
                "INSERT INTO member \
                 (member_name, nick_name, password, balance, state, is_delete, \
                  merchant_id, merchant, created_at, updated_at) VALUES ",
            );
            for (i, _) in chunk.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str("(?, ?, ?, ?, 1, 0, ?, ?, ?, ?)");
            }

            let mut query = sqlx::query(&sql);
            for &idx in chunk {
                let p = &players[idx];
                query = query
                    .bind(&p.name)
                    .bind(&p.name)
                    .bind(DEFAULT_PASSWORD)
                    .bind(p.balance)
                    .bind(DEFAULT_MERCHANT_ID)
                    .bind(DEFAULT_MERCHANT)
                    .bind(now)
                    .bind(now);
            }
            query.execute(&mut *tx).await?;
        }

        let new_names: Vec<String> = new_indices
            .iter()
            .map(|&i| players[i].name.clone())
            .collect();
        let inserted = select_ids_by_name(&mut tx, &new_names).await?;
        for &idx in &new_indices {
            if let Some(&id) = inserted.get(&players[idx].name) {
                players[idx].id = id;
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn select_ids_by_name(
    tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
    names: &[String],
) -> Result<HashMap<String, i64>, DataError> {
    let mut out = HashMap::with_capacity(names.len());
    for chunk in names.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT id, member_name FROM member WHERE member_name IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for name in chunk {
            query = query.bind(name);
        }
        for row in query.fetch_all(&mut **tx).await? {
            out.insert(row.try_get("member_name")?, row.try_get("id")?);
        }
    }
    Ok(out)
}
