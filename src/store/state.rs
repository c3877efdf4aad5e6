//! The `db_state` key-value table: `unique_id_col`, `cols_to_ignore`,
//! `dmeta_cols`, `col_counters_in_sync` (spec 3, 6).

use sqlx::SqlitePool;

use crate::error::Result;

pub(super) async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM db_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(v,)| v))
}

pub(super) async fn set(pool: &SqlitePool, key: &str, value: Option<&str>) -> Result<()> {
    sqlx::query(
        "INSERT INTO db_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub(super) async fn get_json<T: serde::de::DeserializeOwned>(
    pool: &SqlitePool,
    key: &str,
) -> Result<Option<T>> {
    match get(pool, key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub(super) async fn set_json<T: serde::Serialize>(
    pool: &SqlitePool,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    set(pool, key, Some(&raw)).await
}
