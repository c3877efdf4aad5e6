//! Candidate retrieval against the store's FTS index, scored against a
//! query record (spec 4.D).

use std::collections::{BTreeSet, HashMap, HashSet};

use rand::Rng;
use serde_json::{Map, Value};

use crate::config::FinderConfig;
use crate::error::Result;
use crate::record::Record;
use crate::scorer;
use crate::store::Store;
use crate::token::Token;

/// A candidate record with its score, as admitted by the finder.
#[derive(Debug, Clone)]
pub struct MatchedRecord {
    pub id: String,
    pub fields: Map<String, Value>,
    pub score: f64,
    pub bm25_score: f64,
}

/// The result of `find_matches`: both a lookup map and a score-descending
/// ranking (spec 4.D "Output").
#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub by_id: HashMap<String, MatchedRecord>,
    pub ranked: Vec<MatchedRecord>,
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::rng();
    (0..12)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Salt the query's id so it cannot alias an indexed id or a prior search
/// (spec 4.D "Query record id", 9 "Per-id caching in the Finder query").
fn salt_query_id(mut query: Map<String, Value>, unique_id_col: &str) -> Map<String, Value> {
    let salted = match query.get(unique_id_col) {
        Some(existing) => {
            let base = crate::record::stringify_id(existing);
            format!("{base}_{}", random_suffix())
        }
        None => random_suffix(),
    };
    query.insert(unique_id_col.to_string(), Value::String(salted));
    query
}

struct Search<'a> {
    store: &'a Store,
    config: &'a FinderConfig,
    seen_subsets: HashSet<BTreeSet<Token>>,
    admitted: HashMap<String, MatchedRecord>,
    best_score: f64,
    last_query_saturated: bool,
}

impl<'a> Search<'a> {
    fn stop(&self) -> bool {
        self.best_score > self.config.best_score_threshold
            || self.admitted.len() as i64 > self.config.return_records_limit
            || self.last_query_saturated
    }

    /// Issue one FTS query over `subset`, admitting non-saturated,
    /// not-yet-seen candidates (spec 4.D "FTS query shape", "Candidate
    /// admission").
    fn query(&mut self, subset: &[Token], limit: i64, query_record: &Record) -> Result<()> {
        let key: BTreeSet<Token> = subset.iter().cloned().collect();
        if !self.seen_subsets.insert(key) {
            return Ok(());
        }

        let rows = self.store.fts_search(subset, limit)?;
        self.last_query_saturated = rows.len() as i64 == limit;
        if self.last_query_saturated {
            // Too broad to be informative; its rows are not a ranking
            // signal and must not be ingested into candidates (spec 9
            // "Query saturation heuristic").
            return Ok(());
        }

        for (id, bm25) in rows {
            if self.admitted.contains_key(&id) {
                continue;
            }
            let Some(fields) = self.store.get_record(&id)? else {
                continue;
            };
            let candidate = Record::new(
                fields.clone(),
                self.store.unique_id_col().as_deref().unwrap_or(""),
                &self.store.cols_to_ignore(),
                self.store.dmeta_cols().as_deref(),
            )?;
            let score = scorer::score(query_record, &candidate, self.store)?;
            self.best_score = self.best_score.max(score);
            self.admitted.insert(
                id.clone(),
                MatchedRecord {
                    id,
                    fields,
                    score,
                    bm25_score: bm25,
                },
            );
        }

        Ok(())
    }
}

/// Find the most plausible matches for `query` in `store` (spec 4.D).
pub fn find_matches(store: &Store, query: Map<String, Value>, config: &FinderConfig) -> Result<FindResult> {
    let unique_id_col = store.unique_id_col().unwrap_or_default();
    let salted = salt_query_id(query, &unique_id_col);

    let query_record = Record::new(
        salted,
        &unique_id_col,
        &store.cols_to_ignore(),
        store.dmeta_cols().as_deref(),
    )?;

    let tokens = query_record.tokens_in_order_of_rarity(store)?;
    let n = tokens.len();

    let mut search = Search {
        store,
        config,
        seen_subsets: HashSet::new(),
        admitted: HashMap::new(),
        best_score: f64::NEG_INFINITY,
        last_query_saturated: false,
    };

    // Strategy 1: specific -> general, suffixes.
    for start in 0..n {
        if search.stop() {
            break;
        }
        search.query(&tokens[start..], config.return_records_limit, &query_record)?;
    }

    // Strategy 2: specific -> general, sliding bands.
    'bands: for band_size in (1..=n).rev() {
        for start in 0..=(n.saturating_sub(band_size)) {
            if search.stop() {
                break 'bands;
            }
            search.query(
                &tokens[start..start + band_size],
                config.return_records_limit,
                &query_record,
            )?;
        }
    }

    // Strategy 3: randomised subsets, only for n >= 3.
    if n >= 3 {
        let mut rng = rand::rng();
        for _ in 0..config.search_intensity {
            if search.stop() {
                break;
            }
            let size = rng.random_range(2..n);
            let mut indices: Vec<usize> = (0..n).collect();
            for i in (1..indices.len()).rev() {
                let j = rng.random_range(0..=i);
                indices.swap(i, j);
            }
            let subset: Vec<Token> = indices[..size].iter().map(|&i| tokens[i].clone()).collect();
            search.query(&subset, config.return_records_limit, &query_record)?;
        }
    }

    let mut ranked: Vec<MatchedRecord> = search.admitted.values().cloned().collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    Ok(FindResult {
        by_id: search.admitted,
        ranked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn salted_id_never_matches_the_original() {
        let query = json!({"unique_id": "1", "first_name": "robin"})
            .as_object()
            .unwrap()
            .clone();
        let salted = salt_query_id(query, "unique_id");
        let id = salted.get("unique_id").unwrap().as_str().unwrap();
        assert!(id.starts_with("1_"));
        assert_ne!(id, "1");
    }

    #[test]
    fn missing_id_col_gets_a_fresh_random_id() {
        let query = json!({"first_name": "robin"}).as_object().unwrap().clone();
        let salted = salt_query_id(query, "unique_id");
        assert!(salted.get("unique_id").unwrap().as_str().unwrap().len() > 0);
    }
}
