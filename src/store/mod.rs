//! Persistent, embedded store: records table, FTS index, per-column token
//! frequency tables, state kv (spec 3, 4.C).
//!
//! Like the teacher's `Store`, this wraps an async `sqlx::SqlitePool` behind
//! a synchronous API backed by an owned `tokio::runtime::Runtime` — callers
//! never see `.await`.

mod ingest;
mod state;
mod stats;

use std::path::Path;
use std::sync::LazyLock;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::runtime::Runtime;

use crate::error::{Error, Result};

pub use ingest::IngestReport;

static COLUMN_NAME_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Validate a column name before it is interpolated into DDL/DML.
///
/// sqlx can only bind *values*, not identifiers, and per-column token tables
/// are named from caller-supplied column names — unlike
/// `original_source/fuzzyfinder/database.py`'s unchecked f-string
/// interpolation, this store rejects anything that isn't a plain
/// identifier (spec 9, "Additional Open Question resolutions").
pub(crate) fn validate_column_name(col: &str) -> Result<()> {
    if COLUMN_NAME_RE.is_match(col) {
        Ok(())
    } else {
        Err(Error::InvalidColumnName(col.to_string()))
    }
}

pub(crate) fn token_counts_table(col: &str) -> String {
    format!("\"{col}_token_counts\"")
}

/// A persistent (or in-memory) fuzzy-matching index.
pub struct Store {
    pub(crate) pool: SqlitePool,
    pub(crate) rt: Runtime,
    pub(crate) workers: rayon::ThreadPool,
    unique_id_col: std::sync::Mutex<Option<String>>,
    cols_to_ignore: std::sync::Mutex<Vec<String>>,
    dmeta_cols: std::sync::Mutex<Option<Vec<String>>>,
    /// Counter deltas from `write_counters_now=false` ingests, awaiting an
    /// explicit `flush_counters()` call (spec 6 "Configuration options").
    pending_counters: std::sync::Mutex<std::collections::HashMap<String, std::collections::HashMap<String, i64>>>,
}

impl Store {
    /// Open an existing store at `path`, or create one if it doesn't exist.
    /// `path = None` opens an in-memory store (spec 6).
    ///
    /// Re-opening an existing store rejects attempts to change
    /// `cols_to_ignore` / `dmeta_cols` (spec 3 invariant, 6 "Failure on
    /// reconfigure").
    pub fn open_or_create(
        path: Option<&Path>,
        cols_to_ignore: Vec<String>,
        dmeta_cols: Option<Vec<String>>,
    ) -> Result<Self> {
        let rt = Runtime::new().map_err(|e| Error::Runtime(e.to_string()))?;

        let db_url = match path {
            None => "sqlite::memory:".to_string(),
            Some(p) if p.as_os_str().is_empty() => "sqlite::memory:".to_string(),
            Some(p) => {
                let path_str = p.to_string_lossy().replace('\\', "/");
                format!("sqlite://{path_str}?mode=rwc")
            }
        };

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        sqlx::query("PRAGMA journal_mode = WAL")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA synchronous = NORMAL")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA busy_timeout = 5000")
                            .execute(&mut *conn)
                            .await?;
                        Ok(())
                    })
                })
                .connect(&db_url)
                .await
        })?;

        let workers = rayon::ThreadPoolBuilder::new()
            .build()
            .map_err(|e| Error::Runtime(e.to_string()))?;

        let requested_ignore = cols_to_ignore;
        let requested_dmeta = dmeta_cols;

        let store = Store {
            pool,
            rt,
            workers,
            unique_id_col: std::sync::Mutex::new(None),
            cols_to_ignore: std::sync::Mutex::new(requested_ignore.clone()),
            dmeta_cols: std::sync::Mutex::new(requested_dmeta.clone()),
            pending_counters: std::sync::Mutex::new(std::collections::HashMap::new()),
        };

        store.bootstrap(requested_ignore, requested_dmeta)?;
        Ok(store)
    }

    fn bootstrap(
        &self,
        requested_ignore: Vec<String>,
        requested_dmeta: Option<Vec<String>>,
    ) -> Result<()> {
        self.rt.block_on(async {
            let schema = include_str!("schema.sql");
            for stmt in schema.split(';') {
                let stmt = stmt.trim();
                if stmt.is_empty() {
                    continue;
                }
                sqlx::query(stmt).execute(&self.pool).await?;
            }

            // Has this store already been configured? If `unique_id_col` is
            // present in db_state, it has — read back the persisted config.
            // A caller-supplied non-default `cols_to_ignore`/`dmeta_cols` that
            // disagrees with what's stored is a reconfiguration attempt and
            // is rejected; a default (empty/None) argument silently adopts
            // whatever is already on disk (spec 4.C, 6, 7 ConfigConflict).
            match state::get(&self.pool, "unique_id_col").await? {
                Some(existing_id_col) => {
                    let existing_ignore: Vec<String> =
                        state::get_json(&self.pool, "cols_to_ignore")
                            .await?
                            .unwrap_or_default();
                    let existing_dmeta: Option<Vec<String>> =
                        state::get_json(&self.pool, "dmeta_cols").await?;

                    if !requested_ignore.is_empty() && requested_ignore != existing_ignore {
                        return Err(Error::ConfigConflict(
                            "cols_to_ignore differs from the store's existing configuration"
                                .to_string(),
                        ));
                    }
                    if requested_dmeta.is_some() && requested_dmeta != existing_dmeta {
                        return Err(Error::ConfigConflict(
                            "dmeta_cols differs from the store's existing configuration"
                                .to_string(),
                        ));
                    }

                    *self.cols_to_ignore.lock().expect("lock poisoned") = existing_ignore;
                    *self.dmeta_cols.lock().expect("lock poisoned") = existing_dmeta;

                    if !existing_id_col.is_empty() {
                        *self.unique_id_col.lock().expect("lock poisoned") =
                            Some(existing_id_col);
                    }

                    if state::get(&self.pool, "col_counters_in_sync").await? == Some("false".to_string())
                    {
                        tracing::warn!(
                            "store's column counters are out of sync with disk; call \
                             build_or_replace_stats_tables() after flushing counters"
                        );
                    }
                }
                None => {
                    // Fresh store: persist initial config.
                    state::set(&self.pool, "unique_id_col", None).await?;
                    state::set_json(&self.pool, "cols_to_ignore", &requested_ignore).await?;
                    state::set_json(&self.pool, "dmeta_cols", &requested_dmeta).await?;
                    state::set(&self.pool, "col_counters_in_sync", Some("true")).await?;
                }
            }

            Ok(())
        })
    }

    pub(crate) fn unique_id_col(&self) -> Option<String> {
        self.unique_id_col.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_unique_id_col(&self, col: &str) {
        *self.unique_id_col.lock().expect("lock poisoned") = Some(col.to_string());
    }

    pub(crate) fn cols_to_ignore(&self) -> Vec<String> {
        self.cols_to_ignore.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn dmeta_cols(&self) -> Option<Vec<String>> {
        self.dmeta_cols.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn merge_pending_counters(
        &self,
        delta: std::collections::HashMap<String, std::collections::HashMap<String, i64>>,
    ) {
        let mut pending = self.pending_counters.lock().expect("lock poisoned");
        for (col, tokens) in delta {
            let entry = pending.entry(col).or_default();
            for (token, count) in tokens {
                *entry.entry(token).or_insert(0) += count;
            }
        }
    }

    /// Flush any counters accumulated from `write_counters_now=false`
    /// ingests and mark the store back in sync (spec 6, 8 scenario 3
    /// "Deferred counter flush").
    pub fn flush_counters(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending_counters.lock().expect("lock poisoned"));
        if pending.is_empty() {
            return Ok(());
        }
        self.rt.block_on(ingest::flush_counters(self, &pending))?;
        self.rt
            .block_on(state::set(&self.pool, "col_counters_in_sync", Some("true")))?;
        Ok(())
    }

    /// Insert `records`, batching and parallelising ingest (spec 4.C, 5).
    pub fn write_records<I>(
        &self,
        records: I,
        unique_id_col: &str,
        batch_size: usize,
        write_counters_now: bool,
    ) -> Result<IngestReport>
    where
        I: IntoIterator<Item = serde_json::Map<String, serde_json::Value>>,
    {
        ingest::write_records(self, records, unique_id_col, batch_size, write_counters_now)
    }

    /// Recompute `proportion = count / sum(count)` for every per-column
    /// token table (spec 4.C, 9 Open Question c: the denominator is
    /// `sum(token_count)`, not `count(*)`).
    pub fn build_or_replace_stats_tables(&self) -> Result<()> {
        stats::build_or_replace_stats_tables(self)
    }

    /// Look up a token's observed proportion in a column's table. `None`
    /// means the token was never observed in that column (spec 7
    /// TokenNotInStore).
    pub fn token_proportion(&self, col: &str, token: &str) -> Result<Option<f64>> {
        validate_column_name(col)?;
        let table = token_counts_table(col);
        self.rt.block_on(async {
            let sql = format!("SELECT proportion FROM {table} WHERE token = ?1");
            let row: Option<(Option<f64>,)> = match sqlx::query_as(&sql).bind(token).fetch_optional(&self.pool).await {
                Ok(r) => r,
                Err(sqlx::Error::Database(e)) if e.message().contains("no such table") => None,
                Err(e) => return Err(e.into()),
            };
            Ok(row.and_then(|(p,)| p))
        })
    }

    /// Fetch the original record JSON for an id, if present.
    pub fn get_record(&self, id: &str) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
        self.rt.block_on(async {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT original_record FROM df WHERE unique_id = ?1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            match row {
                Some((json,)) => {
                    let value: serde_json::Value = serde_json::from_str(&json)?;
                    Ok(value.as_object().cloned())
                }
                None => Ok(None),
            }
        })
    }

    /// Run an FTS5 `MATCH` query over the given (already-uppercased) token
    /// subset, returning `(unique_id, bm25_score)` pairs, at most `limit`
    /// rows (spec 4.D "FTS query shape").
    pub(crate) fn fts_search(&self, tokens: &[String], limit: i64) -> Result<Vec<(String, f64)>> {
        let escaped: Vec<String> = tokens.iter().map(|t| format!("\"{t}\"")).collect();
        let match_expr = escaped.join(" ");
        self.rt.block_on(async {
            let rows: Vec<(String, f64)> = sqlx::query_as(
                "SELECT unique_id, bm25(fts_target) AS score FROM fts_target \
                 WHERE concat_all MATCH ?1 LIMIT ?2",
            )
            .bind(match_expr)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
    }

    /// Row count of the records table (spec 8, invariant 1).
    pub fn record_count(&self) -> Result<i64> {
        self.rt.block_on(async {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM df")
                .fetch_one(&self.pool)
                .await?;
            Ok(count)
        })
    }

    /// Row count of the FTS index (spec 8, invariant 1:
    /// `count(df) == count(fts_target)`).
    pub fn fts_count(&self) -> Result<i64> {
        self.rt.block_on(async {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fts_target")
                .fetch_one(&self.pool)
                .await?;
            Ok(count)
        })
    }

    /// Raw observed count for a token in a column's table (pre-rebuild;
    /// `proportion` may still be `NULL`). `None` if never observed.
    pub fn token_count(&self, col: &str, token: &str) -> Result<Option<i64>> {
        validate_column_name(col)?;
        let table = token_counts_table(col);
        self.rt.block_on(async {
            let sql = format!("SELECT count FROM {table} WHERE token = ?1");
            match sqlx::query_as(&sql).bind(token).fetch_optional(&self.pool).await {
                Ok(row) => Ok(row.map(|(c,): (i64,)| c)),
                Err(sqlx::Error::Database(e)) if e.message().contains("no such table") => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Sum of `proportion` over a column's token table, for verifying the
    /// stats-rebuild invariant (spec 3, 8: "Σ proportion == 1.0 ± 1e-9").
    pub fn proportion_sum(&self, col: &str) -> Result<f64> {
        validate_column_name(col)?;
        let table = token_counts_table(col);
        self.rt.block_on(async {
            let sql = format!("SELECT COALESCE(SUM(proportion), 0.0) FROM {table}");
            let result: std::result::Result<(f64,), sqlx::Error> =
                sqlx::query_as(&sql).fetch_one(&self.pool).await;
            match result {
                Ok((sum,)) => Ok(sum),
                Err(sqlx::Error::Database(e)) if e.message().contains("no such table") => Ok(0.0),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Whether `col_counters_in_sync` currently reads `"true"` (spec 3, 7
    /// CounterDrift, 8 scenario 3).
    pub fn counters_in_sync(&self) -> Result<bool> {
        self.rt
            .block_on(state::get(&self.pool, "col_counters_in_sync"))
            .map(|v| v.as_deref() == Some("true"))
    }
}
