//! Per-record view: tokens per column, token rarity ordering, identity.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::store::Store;
use crate::token::{self, Token, TokenValue};

/// A record's view over its own fields, built against a store's
/// `unique_id_col` / `cols_to_ignore` / `dmeta_cols` configuration.
///
/// Identity and equality are by id only (spec 4.B / 9 Open Question b):
/// two `Record`s with the same id are the same record for set/map
/// purposes, even if their field values differ.
#[derive(Debug, Clone)]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
    columns_to_index: Vec<String>,
    dmeta_cols: Option<HashSet<String>>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Record {}
impl std::hash::Hash for Record {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A token's observed proportion in a store's per-column table, or the
/// "not in store" sentinel (spec 4.B `token_probabilities`, 7 TokenNotInStore).
#[derive(Debug, Clone, PartialEq)]
pub struct TokenProbability {
    pub token: Token,
    pub proportion: Option<f64>,
}

impl Record {
    /// Build a record view. Fails if `unique_id_col` is absent from `fields`
    /// (spec 3 invariant).
    pub fn new(
        fields: Map<String, Value>,
        unique_id_col: &str,
        cols_to_ignore: &[String],
        dmeta_cols: Option<&[String]>,
    ) -> Result<Self> {
        let id_value = fields
            .get(unique_id_col)
            .ok_or_else(|| Error::MissingIdColumn(unique_id_col.to_string()))?;
        let id = stringify_id(id_value);

        let ignore: HashSet<&str> = cols_to_ignore.iter().map(String::as_str).collect();
        let columns_to_index: Vec<String> = fields
            .keys()
            .filter(|c| c.as_str() != unique_id_col && !ignore.contains(c.as_str()))
            .cloned()
            .collect();

        let dmeta_cols = dmeta_cols.map(|cols| cols.iter().cloned().collect());

        Ok(Record {
            id,
            fields,
            columns_to_index,
            dmeta_cols,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn columns_to_index(&self) -> &[String] {
        &self.columns_to_index
    }

    fn applies_phonetic(&self, col: &str) -> bool {
        match &self.dmeta_cols {
            None => true,
            Some(cols) => cols.contains(col),
        }
    }

    /// `col -> tokenise(fields[col])`, no phonetic expansion.
    pub fn tokens_by_column(&self) -> HashMap<String, Vec<Token>> {
        self.columns_to_index
            .iter()
            .map(|col| {
                let value = self.fields.get(col);
                let token_value = value.map(TokenValue::from).unwrap_or(TokenValue::Missing);
                (col.clone(), token::tokenise(&token_value))
            })
            .collect()
    }

    /// Same as `tokens_by_column`, with phonetic variants appended for
    /// columns in `dmeta_cols` (or all indexed columns if absent).
    pub fn tokens_with_phonetic_by_column(&self) -> HashMap<String, Vec<Token>> {
        let mut by_col = self.tokens_by_column();
        for col in &self.columns_to_index {
            if !self.applies_phonetic(col) {
                continue;
            }
            let tokens = by_col.get(col).cloned().unwrap_or_default();
            let mut variants = Vec::new();
            for t in &tokens {
                variants.extend(token::dmetaphone_variants(t));
            }
            by_col.entry(col.clone()).or_default().extend(variants);
        }
        by_col
    }

    /// Space-joined concatenation of all tokens (with phonetic variants)
    /// across indexed columns, in column order.
    pub fn concat_all(&self) -> String {
        let by_col = self.tokens_with_phonetic_by_column();
        let mut all = Vec::new();
        for col in &self.columns_to_index {
            if let Some(tokens) = by_col.get(col) {
                all.extend(tokens.iter().cloned());
            }
        }
        all.join(" ")
    }

    /// `col -> token -> {token, proportion}`, looked up from the store.
    pub fn token_probabilities(
        &self,
        store: &Store,
    ) -> Result<HashMap<String, HashMap<Token, TokenProbability>>> {
        let by_col = self.tokens_with_phonetic_by_column();
        let mut out = HashMap::with_capacity(by_col.len());
        for (col, tokens) in &by_col {
            let mut col_probs = HashMap::with_capacity(tokens.len());
            for t in tokens {
                let proportion = store.token_proportion(col, t)?;
                col_probs.insert(t.clone(), TokenProbability {
                    token: t.clone(),
                    proportion,
                });
            }
            out.insert(col.clone(), col_probs);
        }
        Ok(out)
    }

    /// All indexed-column tokens, ascending by corpus proportion, dropping
    /// tokens unknown to the store.
    pub fn tokens_in_order_of_rarity(&self, store: &Store) -> Result<Vec<Token>> {
        let probs = self.token_probabilities(store)?;
        let mut entries: Vec<(Token, f64)> = Vec::new();
        for col_probs in probs.values() {
            for p in col_probs.values() {
                if let Some(proportion) = p.proportion {
                    entries.push((p.token.clone(), proportion));
                }
            }
        }
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(entries.into_iter().map(|(t, _)| t).collect())
    }
}

/// Stringify an id value the way JSON values naturally render: plain text
/// for strings (no surrounding quotes), decimal for numbers.
pub(crate) fn stringify_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(fields: Value) -> Record {
        Record::new(
            fields.as_object().unwrap().clone(),
            "unique_id",
            &[],
            None,
        )
        .unwrap()
    }

    #[test]
    fn missing_id_column_fails() {
        let fields = json!({"value": "x"}).as_object().unwrap().clone();
        let err = Record::new(fields, "unique_id", &[], None).unwrap_err();
        assert!(matches!(err, Error::MissingIdColumn(_)));
    }

    #[test]
    fn columns_to_index_excludes_id_and_ignored() {
        let r = Record::new(
            json!({"unique_id": "1", "a": "x", "b": "y"})
                .as_object()
                .unwrap()
                .clone(),
            "unique_id",
            &["b".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(r.columns_to_index(), &["a".to_string()]);
    }

    #[test]
    fn concat_all_joins_columns_in_order() {
        let r = rec(json!({"unique_id": "1", "first_name": "robin", "surname": "linacre"}));
        let concat = r.concat_all();
        assert!(concat.contains("ROBIN"));
        assert!(concat.contains("LINACRE"));
    }

    #[test]
    fn dmeta_cols_restricts_phonetic_expansion() {
        let r = Record::new(
            json!({"unique_id": "1", "first_name": "robin", "notes": "some free text"})
                .as_object()
                .unwrap()
                .clone(),
            "unique_id",
            &[],
            Some(&["first_name".to_string()]),
        )
        .unwrap();
        let tokens = r.tokens_with_phonetic_by_column();
        // first_name gets phonetic variants appended (more tokens than the plain split).
        assert!(tokens["first_name"].len() >= 1);
        // notes is not a dmeta col: no phonetic expansion beyond base tokens.
        let plain = r.tokens_by_column();
        assert_eq!(tokens["notes"], plain["notes"]);
    }
}
