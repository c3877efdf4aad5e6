//! Batched, parallel ingest with an integrity-preserving fallback (spec 4.C
//! `write_batch`, 5, 9 "Integrity fallback pattern").
//!
//! Workers (run on the store's own `rayon::ThreadPool`) compute row tuples
//! and per-record token counters — pure, store-free work. The driver
//! (this thread) streams their results off a channel as they complete and
//! does all store I/O: bulk-insert-or-fallback, then counter merge.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::record::Record;
use crate::store::{token_counts_table, validate_column_name, Store};

/// token -> occurrence count, per column, for one record (duplicates in a
/// column's token list count multiple times, matching spec 3's per-column
/// count table invariant).
pub(super) type ColumnCounters = HashMap<String, HashMap<String, i64>>;

struct TransformedRecord {
    id: String,
    json: String,
    concat_all: String,
    counters: ColumnCounters,
}

/// Outcome of a `write_records` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    pub rows_inserted: u64,
    pub rows_skipped_duplicate: u64,
}

fn transform_record(
    fields: Map<String, Value>,
    unique_id_col: &str,
    cols_to_ignore: &[String],
    dmeta_cols: Option<&[String]>,
) -> Result<TransformedRecord> {
    let record = Record::new(fields.clone(), unique_id_col, cols_to_ignore, dmeta_cols)?;

    let json = serde_json::to_string(&Value::Object(fields))?;
    let concat_all = record.concat_all();

    let mut counters: ColumnCounters = HashMap::new();
    for (col, tokens) in record.tokens_with_phonetic_by_column() {
        let col_counter: &mut HashMap<String, i64> = counters.entry(col).or_default();
        for t in tokens {
            *col_counter.entry(t).or_insert(0) += 1;
        }
    }

    Ok(TransformedRecord {
        id: record.id().to_string(),
        json,
        concat_all,
        counters,
    })
}

fn merge_counters(session: &mut ColumnCounters, delta: &ColumnCounters) {
    for (col, tokens) in delta {
        let entry = session.entry(col.clone()).or_default();
        for (token, count) in tokens {
            *entry.entry(token.clone()).or_insert(0) += count;
        }
    }
}

pub(super) fn write_records<I>(
    store: &Store,
    records: I,
    unique_id_col: &str,
    batch_size: usize,
    write_counters_now: bool,
) -> Result<IngestReport>
where
    I: IntoIterator<Item = Map<String, Value>>,
{
    let batch_size = batch_size.max(1);
    let mut iter = records.into_iter().peekable();

    // Step 1: adopt unique_id_col and create count tables from the first
    // record's indexed columns, if this is the store's first write.
    if store.unique_id_col().is_none() {
        if let Some(first) = iter.peek() {
            let first_record = Record::new(
                first.clone(),
                unique_id_col,
                &store.cols_to_ignore(),
                store.dmeta_cols().as_deref(),
            )?;
            store.rt.block_on(create_count_tables(
                store,
                first_record.columns_to_index(),
            ))?;
        }
        store.set_unique_id_col(unique_id_col);
        store
            .rt
            .block_on(super::state::set(&store.pool, "unique_id_col", Some(unique_id_col)))?;
    }

    let cols_to_ignore = store.cols_to_ignore();
    let dmeta_cols = store.dmeta_cols();

    let mut session_counters: ColumnCounters = HashMap::new();
    let mut report = IngestReport::default();

    let chunks: Vec<Vec<Map<String, Value>>> = {
        let mut chunks = Vec::new();
        let mut current = Vec::with_capacity(batch_size);
        for record in iter {
            current.push(record);
            if current.len() == batch_size {
                chunks.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    };

    let (tx, rx) = crossbeam_channel::unbounded::<Result<Vec<TransformedRecord>>>();

    std::thread::scope(|scope| {
        scope.spawn(move || {
            store.workers.install(|| {
                use rayon::prelude::*;
                chunks.into_par_iter().for_each(|chunk| {
                    let result: Result<Vec<TransformedRecord>> = chunk
                        .into_iter()
                        .map(|fields| {
                            transform_record(
                                fields,
                                unique_id_col,
                                &cols_to_ignore,
                                dmeta_cols.as_deref(),
                            )
                        })
                        .collect();
                    let _ = tx.send(result);
                });
            });
        });

        for chunk_result in rx.iter() {
            let rows = chunk_result?;
            let (inserted, skipped, deltas) = store.rt.block_on(insert_chunk(store, rows))?;
            report.rows_inserted += inserted;
            report.rows_skipped_duplicate += skipped;
            merge_counters(&mut session_counters, &deltas);
        }

        Ok::<(), Error>(())
    })?;

    store
        .rt
        .block_on(super::state::set(&store.pool, "col_counters_in_sync", Some("false")))?;

    if write_counters_now {
        store.rt.block_on(flush_counters(store, &session_counters))?;
        store
            .rt
            .block_on(super::state::set(&store.pool, "col_counters_in_sync", Some("true")))?;
    } else {
        // Caller must flush explicitly before counters/proportions are
        // trustworthy (spec 6 "Configuration options (ingest)").
        store.merge_pending_counters(session_counters);
    }

    Ok(report)
}

async fn create_count_tables(store: &Store, columns: &[String]) -> Result<()> {
    for col in columns {
        validate_column_name(col)?;
        let table = token_counts_table(col);
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (token TEXT PRIMARY KEY, count INTEGER NOT NULL, proportion REAL)"
        );
        sqlx::query(&sql).execute(&store.pool).await?;
    }
    Ok(())
}

/// Bulk-insert-or-fallback for one chunk (spec 4.C step 4, 9 "Integrity
/// fallback pattern"). Returns `(rows_inserted, rows_skipped, counters)`.
async fn insert_chunk(
    store: &Store,
    rows: Vec<TransformedRecord>,
) -> Result<(u64, u64, ColumnCounters)> {
    if rows.is_empty() {
        return Ok((0, 0, HashMap::new()));
    }

    match bulk_insert(store, &rows).await {
        Ok(()) => {
            let mut counters = HashMap::new();
            for r in &rows {
                merge_counters(&mut counters, &r.counters);
            }
            Ok((rows.len() as u64, 0, counters))
        }
        Err(sqlx::Error::Database(e)) if is_unique_violation(&*e) => {
            tracing::debug!(
                chunk_size = rows.len(),
                "bulk insert hit a duplicate id, falling back to row-by-row"
            );
            row_by_row_insert(store, rows).await
        }
        Err(e) => Err(e.into()),
    }
}

fn is_unique_violation(e: &dyn sqlx::error::DatabaseError) -> bool {
    e.code().map(|c| c == "1555" || c == "2067").unwrap_or(false) || e.message().contains("UNIQUE")
}

async fn bulk_insert(store: &Store, rows: &[TransformedRecord]) -> std::result::Result<(), sqlx::Error> {
    let mut tx = store.pool.begin().await?;

    let mut qb = sqlx::QueryBuilder::new("INSERT INTO df (unique_id, original_record, concat_all) ");
    qb.push_values(rows, |mut b, r| {
        b.push_bind(&r.id).push_bind(&r.json).push_bind(&r.concat_all);
    });
    qb.build().execute(&mut *tx).await?;

    let mut qb = sqlx::QueryBuilder::new("INSERT INTO fts_target (unique_id, concat_all) ");
    qb.push_values(rows, |mut b, r| {
        b.push_bind(&r.id).push_bind(&r.concat_all);
    });
    qb.build().execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}

async fn row_by_row_insert(
    store: &Store,
    rows: Vec<TransformedRecord>,
) -> Result<(u64, u64, ColumnCounters)> {
    let mut tx = store.pool.begin().await?;
    let mut inserted = 0u64;
    let mut skipped = 0u64;
    let mut counters = HashMap::new();

    for r in rows {
        let outcome = sqlx::query("INSERT INTO df (unique_id, original_record, concat_all) VALUES (?1, ?2, ?3)")
            .bind(&r.id)
            .bind(&r.json)
            .bind(&r.concat_all)
            .execute(&mut *tx)
            .await;

        match outcome {
            Ok(_) => {
                sqlx::query("INSERT INTO fts_target (unique_id, concat_all) VALUES (?1, ?2)")
                    .bind(&r.id)
                    .bind(&r.concat_all)
                    .execute(&mut *tx)
                    .await?;
                merge_counters(&mut counters, &r.counters);
                inserted += 1;
            }
            Err(sqlx::Error::Database(e)) if is_unique_violation(&*e) => {
                tracing::debug!(id = %r.id, "record id already exists in store, skipping");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit().await?;
    Ok((inserted, skipped, counters))
}

/// Upsert session counters into each column's table: `count += delta` on
/// conflict, else insert with `proportion = NULL` (spec 4.C "Counter
/// flush").
pub(super) async fn flush_counters(store: &Store, counters: &ColumnCounters) -> Result<()> {
    for (col, tokens) in counters {
        validate_column_name(col)?;
        let table = token_counts_table(col);
        for (token, delta) in tokens {
            let sql = format!(
                "INSERT INTO {table} (token, count, proportion) VALUES (?1, ?2, NULL) \
                 ON CONFLICT(token) DO UPDATE SET count = count + excluded.count"
            );
            sqlx::query(&sql)
                .bind(token)
                .bind(delta)
                .execute(&store.pool)
                .await?;
        }
    }
    Ok(())
}
