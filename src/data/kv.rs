//! Redis operations: the task-id counter and site-key cleanup.

use chrono::{DateTime, Local, NaiveTime};
use futures::stream::{self, StreamExt};
use redis::aio::MultiplexedConnection;
use tracing::{info, warn};

use super::DataError;

/// Suggested per-round SCAN size (Redis may return more or fewer).
const SCAN_COUNT: usize = 10_000;

/// Keys deleted per pipeline round trip.
const PIPE_BATCH: usize = 1000;

/// Sites cleaned concurrently.
const SITE_CONCURRENCY: usize = 10;

const TASK_COUNTER_PREFIX: &str = "stress-pool:count:";

/// Monotonically increasing id per `(date, game_id)`: HINCRBY the hash
/// field, set an expiry at the next local midnight when the field was just
/// created. Format: `YYYYMMDD-<game_id>-<counter>`.
pub(crate) async fn next_task_id(
    mut conn: MultiplexedConnection,
    game_id: i64,
) -> Result<String, DataError> {
    let now = Local::now();
    let date = now.format("%Y%m%d").to_string();
    let key = format!("{TASK_COUNTER_PREFIX}{date}");

    let count: i64 = redis::cmd("HINCRBY")
        .arg(&key)
        .arg(game_id)
        .arg(1)
        .query_async(&mut conn)
        .await?;

    if count == 1 {
        if let Some(midnight) = next_local_midnight(now) {
            let _: Result<i64, _> = redis::cmd("EXPIREAT")
                .arg(&key)
                .arg(midnight.timestamp())
                .query_async(&mut conn)
                .await;
        }
    }

    Ok(format!("{date}-{game_id}-{count}"))
}

fn next_local_midnight(now: DateTime<Local>) -> Option<DateTime<Local>> {
    let tomorrow = now.date_naive().succ_opt()?;
    tomorrow
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .single()
}

/// Purge `{site}:*` keys for every site, at most [`SITE_CONCURRENCY`] sites
/// in flight.
pub(crate) async fn clean_sites(
    conn: MultiplexedConnection,
    sites: &[String],
) -> Result<(), DataError> {
    if sites.is_empty() {
        return Ok(());
    }
    info!(sites = sites.len(), "cleaning redis site keys");

    let results: Vec<Result<(), DataError>> = stream::iter(sites.iter().cloned())
        .map(|site| {
            let conn = conn.clone();
            async move { clean_site(conn, &site).await }
        })
        .buffer_unordered(SITE_CONCURRENCY)
        .collect()
        .await;

    for result in results {
        result?;
    }
    Ok(())
}

/// SCAN + pipelined DEL for one site's `{site}:*` pattern.
async fn clean_site(mut conn: MultiplexedConnection, site: &str) -> Result<(), DataError> {
    let pattern = format!("{site}:*");
    let mut cursor: u64 = 0;
    let mut deleted: usize = 0;

    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(&mut conn)
            .await?;

        for batch in keys.chunks(PIPE_BATCH) {
            let mut pipe = redis::pipe();
            for key in batch {
                pipe.del(key);
            }
            let counts: Vec<i64> = pipe.query_async(&mut conn).await?;
            deleted += counts.iter().sum::<i64>() as usize;
        }

        cursor = next;
        if cursor == 0 {
            break;
        }
    }

    if deleted > 0 {
        info!(site, deleted, "cleaned site keys");
    } else {
        warn!(site, "no keys matched for site");
    }
    Ok(())
}
