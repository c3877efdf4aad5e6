//! Stats rebuild: `proportion = count / sum(count)` per column (spec 4.C
//! "Stats rebuild", 9 Open Question c).

use crate::error::Result;
use crate::store::Store;

pub(super) fn build_or_replace_stats_tables(store: &Store) -> Result<()> {
    store.rt.block_on(async {
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE '%_token_counts'",
        )
        .fetch_all(&store.pool)
        .await?;

        for (table,) in tables {
            // `sum(count)` is the correct denominator, not `count(*)` — a
            // stats-rebuild bug in one variant of the original source used
            // the row count instead (spec 9 Open Question c).
            let sql = format!(
                "UPDATE \"{table}\" SET proportion = CAST(count AS REAL) / \
                 (SELECT SUM(count) FROM \"{table}\")"
            );
            sqlx::query(&sql).execute(&store.pool).await?;
        }

        Ok(())
    })
}
